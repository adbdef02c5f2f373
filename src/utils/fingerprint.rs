// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Content fingerprints used to detect spec drift.

use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hash the JSON form of `value` into a lowercase hex string.
///
/// Only used for change detection. Maps must be ordered (`BTreeMap`) for the
/// JSON form to be canonical, which holds for every type in `crate::types`.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
