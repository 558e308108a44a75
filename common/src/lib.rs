// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.

//! Shared task model, the in-memory task store and the read-only views
//! computed from it. Nothing in this crate performs I/O.

pub mod store;
pub mod task;
pub mod validation;
pub mod views;

pub use store::{Stats, TaskStore, ViewState};
pub use task::{
    Filter, Priority, Settings, SettingsPatch, SortKey, Task, TaskDraft, TaskId, TaskPatch, Theme,
};
