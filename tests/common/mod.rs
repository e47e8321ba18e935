//! Shared test fixtures (used by unit and proptest)
