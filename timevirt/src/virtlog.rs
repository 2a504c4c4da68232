/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Macros for tracing VIRTLOG entries: events whose content depends only on
//! simulated progress, so two runs of the same simulation can be diffed.
//! ['virtlog'] writes such an entry at INFO level.

/// Macro used to encapsulate tracing should-be-deterministic information.
/// This is currently at the INFO log level.
#[macro_export]
macro_rules! virtlog {
    ($($arg:tt)+) => {{
        tracing::info!("VIRTLOG {}", format!($($arg)+));
    }};
}
