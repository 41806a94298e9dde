//! Query modules for the relational store.

pub mod dead_letter;
pub mod entities;
