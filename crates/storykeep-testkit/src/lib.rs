//! # Storykeep Testkit
//!
//! Testing utilities for the storykeep workspace.
//!
//! ## Overview
//!
//! This crate provides in-memory implementations of the collaborator traits
//! (story directory, role directory, site registry, content source) and a
//! seeded [`TestWorld`] used by the integration scenarios.
//!
//! ## Test Fixtures
//!
//! Quickly set up a test scenario:
//!
//! ```rust
//! use storykeep_testkit::TestWorld;
//!
//! let world = TestWorld::new();
//! let story = TestWorld::public_story();
//! let owner = TestWorld::teller();
//! ```

pub mod fixtures;

pub use fixtures::{FakeContent, FakeRoles, FakeSites, FakeStories, TestWorld};
