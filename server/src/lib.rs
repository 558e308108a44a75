// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
pub mod config;
pub mod handlers;
pub mod local;
pub mod persistence;
pub mod remote;
pub mod routes;
pub mod service;
