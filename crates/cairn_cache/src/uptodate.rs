//! The rebuild decision.

use std::fmt;

use cairn_common::Digest;
use cairn_frozen::FrozenError;

use crate::fs::FileSystem;
use crate::state::BuiltNodeView;

/// Why a node has to be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    /// No record exists for the node's current identity.
    NoRecord,
    /// The last build of the node failed.
    PreviousFailure,
    /// A recorded output no longer exists.
    OutputMissing(String),
    /// A recorded output has a different timestamp.
    OutputChanged(String),
    /// The input signature differs from the recorded one.
    InputsChanged,
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::NoRecord => write!(f, "never built"),
            RebuildReason::PreviousFailure => write!(f, "previous build failed"),
            RebuildReason::OutputMissing(path) => write!(f, "output {path} is missing"),
            RebuildReason::OutputChanged(path) => write!(f, "output {path} was modified"),
            RebuildReason::InputsChanged => write!(f, "inputs changed"),
        }
    }
}

/// Outcome of [`check_up_to_date`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The recorded outcome still holds.
    UpToDate,
    /// The node must run.
    Rebuild(RebuildReason),
}

impl Freshness {
    /// Returns `true` for [`Freshness::UpToDate`].
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Freshness::UpToDate)
    }
}

/// Decides whether a node can be skipped.
///
/// `record` is the state record for the node's current identity digest and
/// `signature` its freshly computed input signature. Output timestamps are
/// compared first as a cheap filter; the signature comparison is made even
/// when every timestamp matches.
pub fn check_up_to_date(
    record: Option<&BuiltNodeView<'_>>,
    fs: &dyn FileSystem,
    signature: &Digest,
) -> Result<Freshness, FrozenError> {
    let Some(record) = record else {
        return Ok(Freshness::Rebuild(RebuildReason::NoRecord));
    };
    if !record.success()? {
        return Ok(Freshness::Rebuild(RebuildReason::PreviousFailure));
    }
    for outputs in [record.output_files()?, record.aux_output_files()?] {
        for file in outputs.iter() {
            let file = file?;
            let current = fs.timestamp(file.filename);
            if current == 0 {
                return Ok(Freshness::Rebuild(RebuildReason::OutputMissing(
                    file.filename.to_string(),
                )));
            }
            if current != file.timestamp {
                return Ok(Freshness::Rebuild(RebuildReason::OutputChanged(
                    file.filename.to_string(),
                )));
            }
        }
    }
    if record.input_signature()? != *signature {
        return Ok(Freshness::Rebuild(RebuildReason::InputsChanged));
    }
    Ok(Freshness::UpToDate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;
    use crate::state::{lay_out, BuiltNode, RecordedFile, StateFile};

    const T: u64 = 1_700_000_000_000_000_000;

    // a one-record state file, laid out without a graph
    fn state_with(node: &BuiltNode) -> (StateFile, Digest) {
        let guid = Digest::from_bytes(b"node");
        let bytes = lay_out(&[(guid, node.clone())]).into_bytes(None);
        (StateFile::from_bytes(bytes).unwrap(), guid)
    }

    fn out_bin_record(success: bool) -> BuiltNode {
        BuiltNode {
            success,
            input_signature: Digest::from_bytes(b"D"),
            output_files: vec![RecordedFile::new("out.bin", T)],
            aux_output_files: vec![],
            input_files: vec![],
            implicit_input_files: vec![],
        }
    }

    fn check(fs: &MemFs, node: &BuiltNode, signature: &[u8]) -> Freshness {
        let (state, guid) = state_with(node);
        let record = state.lookup(&guid).unwrap();
        check_up_to_date(record.as_ref(), fs, &Digest::from_bytes(signature)).unwrap()
    }

    #[test]
    fn unchanged_node_is_skipped() {
        let fs = MemFs::new();
        fs.write("out.bin", T, "bits");
        assert_eq!(check(&fs, &out_bin_record(true), b"D"), Freshness::UpToDate);
    }

    #[test]
    fn deleted_output_rebuilds() {
        let fs = MemFs::new();
        assert_eq!(
            check(&fs, &out_bin_record(true), b"D"),
            Freshness::Rebuild(RebuildReason::OutputMissing("out.bin".into()))
        );
    }

    #[test]
    fn touched_output_rebuilds() {
        let fs = MemFs::new();
        fs.write("out.bin", T + 1, "bits");
        assert_eq!(
            check(&fs, &out_bin_record(true), b"D"),
            Freshness::Rebuild(RebuildReason::OutputChanged("out.bin".into()))
        );
    }

    #[test]
    fn signature_change_rebuilds_despite_matching_timestamps() {
        let fs = MemFs::new();
        fs.write("out.bin", T, "bits");
        assert_eq!(
            check(&fs, &out_bin_record(true), b"D-prime"),
            Freshness::Rebuild(RebuildReason::InputsChanged)
        );
    }

    #[test]
    fn failed_build_rebuilds() {
        let fs = MemFs::new();
        fs.write("out.bin", T, "bits");
        assert_eq!(
            check(&fs, &out_bin_record(false), b"D"),
            Freshness::Rebuild(RebuildReason::PreviousFailure)
        );
    }

    #[test]
    fn missing_record_rebuilds() {
        let fs = MemFs::new();
        let verdict = check_up_to_date(None, &fs, &Digest::ZERO).unwrap();
        assert_eq!(verdict, Freshness::Rebuild(RebuildReason::NoRecord));
        assert!(!verdict.is_up_to_date());
    }

    #[test]
    fn reasons_display() {
        assert_eq!(
            RebuildReason::OutputMissing("a.o".into()).to_string(),
            "output a.o is missing"
        );
        assert_eq!(RebuildReason::InputsChanged.to_string(), "inputs changed");
    }
}
