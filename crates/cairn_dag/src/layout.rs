//! Byte layout of the `.dag` format. Offsets are relative to the record start.

pub(crate) mod root {
    pub const MAGIC: usize = 0;
    pub const NODE_COUNT: usize = 4;
    pub const NODE_GUIDS: usize = 8;
    pub const NODES: usize = 16;
    pub const GUID_ORDER: usize = 24;
    pub const PASSES: usize = 32;
    pub const FILE_SIGNATURES: usize = 40;
    pub const GLOB_SIGNATURES: usize = 48;
    pub const CONTENT_DIGEST_EXTENSIONS: usize = 56;
    pub const STATE_FILE_NAME: usize = 64;
    pub const STATE_FILE_NAME_TMP: usize = 72;
    pub const SCAN_CACHE_FILE_NAME: usize = 80;
    pub const SCAN_CACHE_FILE_NAME_TMP: usize = 88;
    pub const DIGEST_CACHE_FILE_NAME: usize = 96;
    pub const DIGEST_CACHE_FILE_NAME_TMP: usize = 104;
    pub const BUILD_TITLE: usize = 112;
    pub const SIZE: usize = 120;
}

pub(crate) mod node {
    pub const ACTION: usize = 0;
    pub const ANNOTATION: usize = 8;
    pub const PASS_INDEX: usize = 16;
    pub const FLAGS: usize = 20;
    pub const DEPENDENCIES: usize = 24;
    pub const BACK_LINKS: usize = 32;
    pub const INPUTS: usize = 40;
    pub const OUTPUTS: usize = 48;
    pub const OUTPUT_DIRS: usize = 56;
    pub const AUX_OUTPUTS: usize = 64;
    pub const ENV_VARS: usize = 72;
    pub const SCANNER: usize = 80;
    pub const SIZE: usize = 88;
}

pub(crate) mod scanner {
    pub const KIND: usize = 0;
    pub const INCLUDE_PATHS: usize = 8;
    pub const GUID: usize = 16;
    pub const GENERIC_FLAGS: usize = 48;
    pub const KEYWORDS: usize = 56;
    pub const SIZE: usize = 64;

    pub const KIND_CPP: u32 = 0;
    pub const KIND_GENERIC: u32 = 1;
}

pub(crate) mod keyword {
    pub const TEXT: usize = 0;
    pub const LEN: usize = 8;
    pub const FOLLOW: usize = 10;
    pub const SIZE: usize = 16;
}

pub(crate) mod file {
    pub const NAME: usize = 0;
    pub const HASH: usize = 8;
    pub const SIZE: usize = 16;
}

pub(crate) mod env {
    pub const NAME: usize = 0;
    pub const VALUE: usize = 8;
    pub const SIZE: usize = 16;
}

pub(crate) mod pass {
    pub const NAME: usize = 0;
    pub const BUILD_ORDER: usize = 8;
    pub const SIZE: usize = 16;
}

pub(crate) mod file_sig {
    pub const PATH: usize = 0;
    pub const TIMESTAMP: usize = 8;
    pub const SIZE: usize = 16;
}

pub(crate) mod glob_sig {
    pub const PATH: usize = 0;
    pub const DIGEST: usize = 8;
    pub const SIZE: usize = 40;
}
