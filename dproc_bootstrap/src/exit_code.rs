// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Process Exit Codes
//!
//! The CLI contract is deliberately small: `0` for success, `1` for any
//! error. The taxonomy's structured detail travels on stderr, not in the
//! exit code.

/// Process exit codes used by the dproc binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

/// Maps an application result onto the process exit code.
pub fn result_to_exit_code<T, E>(result: &Result<T, E>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::Success,
        Err(_) => ExitCode::Failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping() {
        assert_eq!(result_to_exit_code::<_, ()>(&Ok(())), ExitCode::Success);
        assert_eq!(result_to_exit_code::<(), _>(&Err("boom")), ExitCode::Failure);
    }
}
