// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.

//! Checks applied where tasks enter the system through a form.
//! The store itself accepts whatever it is given.
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Priority, TaskDraft, clean_tags, parse_timestamp};

/// Maximum text length accepted by the full task form.
pub const ADVANCED_TEXT_MAX: usize = 200;
/// Maximum text length accepted by the quick-add form.
pub const SIMPLE_TEXT_MAX: usize = 100;

/// Field name to message, one entry per failing field.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields.insert(field.to_string(), message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// Tags arrive either as the raw comma-separated input or as a list.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum TagsInput {
    Csv(String),
    List(Vec<String>),
}

impl TagsInput {
    fn into_tags(self) -> Vec<String> {
        match self {
            TagsInput::Csv(raw) => clean_tags(raw.split(',').map(str::to_string).collect()),
            TagsInput::List(tags) => clean_tags(tags),
        }
    }
}

/// Payload of the full task form.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedForm {
    pub text: String,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<String>,
    pub tags: Option<TagsInput>,
    pub notes: Option<String>,
    pub estimated_time: Option<u32>,
}

/// Payload of the quick-add form.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct QuickForm {
    pub text: String,
    pub category: Option<String>,
    pub priority: Option<Priority>,
}

fn check_text(errors: &mut ValidationErrors, text: &str, max: usize) {
    if text.trim().is_empty() {
        errors.add("text", "Task text is required.");
    } else if text.chars().count() > max {
        errors.add("text", format!("Task text cannot exceed {max} characters."));
    }
}

/// Validates the full form and turns it into a draft with trimmed text,
/// notes and tags. Dates without an offset are read in `now`'s offset.
pub fn validate_advanced(
    form: AdvancedForm,
    now: DateTime<FixedOffset>,
) -> Result<TaskDraft, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    check_text(&mut errors, &form.text, ADVANCED_TEXT_MAX);

    let due_date = match form.due_date.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match parse_timestamp(raw, now.offset()) {
            None => {
                errors.add("dueDate", "Due date is not a valid date.");
                None
            }
            Some(due) => {
                // A bare date is due for the whole day, so today still counts.
                let date_only = raw.len() == 10;
                let in_past = if date_only {
                    due.with_timezone(now.offset()).date_naive() < now.date_naive()
                } else {
                    due < now.with_timezone(&Utc)
                };
                if in_past {
                    errors.add("dueDate", "Due date cannot be in the past.");
                }
                Some(due)
            }
        },
    };

    if form.estimated_time == Some(0) {
        errors.add("estimatedTime", "Estimated time must be a positive number of minutes.");
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(TaskDraft {
        text: form.text.trim().to_string(),
        category: form.category.filter(|c| !c.trim().is_empty()),
        priority: form.priority,
        due_date,
        tags: form.tags.map(TagsInput::into_tags).unwrap_or_default(),
        notes: form.notes.map(|notes| notes.trim().to_string()),
        estimated_time: form.estimated_time,
    })
}

/// Validates the quick-add form.
pub fn validate_quick(form: QuickForm) -> Result<TaskDraft, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    check_text(&mut errors, &form.text, SIMPLE_TEXT_MAX);
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(TaskDraft {
        category: form.category.filter(|c| !c.trim().is_empty()),
        priority: form.priority,
        ..TaskDraft::new(form.text.trim())
    })
}
