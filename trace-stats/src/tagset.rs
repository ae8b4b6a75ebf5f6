// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Canonical tag pairs and sorted tag sets used to fingerprint stats counts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single `name:value` tag.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Tag {
        Tag {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

/// A set of tags sorted lexicographically by name then value.
///
/// The sorted order makes [`TagSet::key`] canonical: the same tags always
/// produce the same fingerprint regardless of insertion order. Duplicate tag
/// names are not allowed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet(Vec<Tag>);

impl TagSet {
    /// Build a tag set from the given tags, sorting them into canonical order.
    pub fn new(mut tags: Vec<Tag>) -> TagSet {
        tags.sort();
        debug_assert!(
            tags.windows(2).all(|w| w[0].name != w[1].name),
            "duplicate tag name in tag set"
        );
        TagSet(tags)
    }

    /// The canonical `name:value,name:value` fingerprint of this set.
    pub fn key(&self) -> String {
        let mut key = String::new();
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            key.push_str(&tag.name);
            key.push(':');
            key.push_str(&tag.value);
        }
        key
    }

    /// Append a tag without re-sorting. Used for the sublayer tag, which the
    /// key grammar places after the base tags.
    pub fn push(&mut self, tag: Tag) {
        self.0.push(tag);
    }

    pub fn tags(&self) -> &[Tag] {
        &self.0
    }
}
