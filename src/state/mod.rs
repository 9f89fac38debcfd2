/// State management module
///
/// This module handles all collection state, including:
/// - The metadata cache database (library.rs)
/// - Shared data structures (data.rs)
/// - The in-memory path and tag index of an open collection (index.rs)
pub mod data;
pub mod index;
pub mod library;
