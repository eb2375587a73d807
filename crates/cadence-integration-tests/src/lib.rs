//! Cross-crate scenarios for Cadence live under `tests/`.
