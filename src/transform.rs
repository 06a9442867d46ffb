//! Per-line byte transforms: uppercase for the server, identity for the client.

/// In-place transform of one line. The line length never changes.
pub trait LineTransform {
    fn apply(&self, line: &mut [u8]);
}

/// Leaves the line untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl LineTransform for Identity {
    fn apply(&self, _line: &mut [u8]) {}
}

/// ASCII uppercase; every other byte passes through.
#[derive(Debug, Default, Clone, Copy)]
pub struct Uppercase;

impl LineTransform for Uppercase {
    fn apply(&self, line: &mut [u8]) {
        line.make_ascii_uppercase();
    }
}
