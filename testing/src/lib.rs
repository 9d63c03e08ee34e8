// SPDX-License-Identifier: MIT
pub mod cmdline;
pub mod fixtures;
