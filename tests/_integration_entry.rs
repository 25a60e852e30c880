// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

#![allow(clippy::all)]

mod integration_tests {
    pub mod common;

    pub mod account_flow_s2_s3_s4;
    pub mod echo_s1;
    pub mod graceful_shutdown_s6;
    pub mod pool_exhaustion_s5;
}
