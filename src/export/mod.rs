//! Secondary output formats derived from a [`crate::NormalizedDocument`].

pub mod docbook;
