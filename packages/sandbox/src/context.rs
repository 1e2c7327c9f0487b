// ABOUTME: Build-context assembly for sandbox image builds
// ABOUTME: Serializes a FileSet, Dockerfile, and optional seccomp profile into one tar stream

use std::io::Read;
use std::path::{Component, Path};

use rand::RngCore;
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::fileset::FileSet;
use crate::network::SeccompProfile;

/// Engine value that disables syscall filtering without a profile document.
const UNCONFINED_REF: &str = "unconfined";

/// Assembled build context plus the seccomp reference generated for it.
#[derive(Debug)]
pub(crate) struct BuildContext {
    /// Complete tar stream, ready for the engine's image-build call.
    pub archive: Vec<u8>,
    /// Value the container's `seccomp=` security option should reference,
    /// when a non-default profile was configured.
    pub profile_ref: Option<String>,
}

/// Serialize `files` plus the Dockerfile (and, for a custom seccomp
/// profile, its document) into a single tar stream.
///
/// Each file is read exactly once and its handle released as soon as the
/// entry is written, whether or not assembly completes. No partial
/// archive is ever returned.
pub(crate) fn assemble(
    files: &dyn FileSet,
    dockerfile: &str,
    seccomp: &SeccompProfile,
) -> Result<BuildContext> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut buf = Vec::new();
    for i in 0..files.len() {
        let mut file = files.at(i)?;
        let path = normalize_path(&file.path)
            .ok_or_else(|| SandboxError::InvalidPath(file.path.clone()))?;
        buf.clear();
        file.reader.read_to_end(&mut buf)?;
        append_entry(&mut builder, &path, &buf)?;
        debug!(path = %path, bytes = buf.len(), "added build context entry");
    }

    append_entry(&mut builder, "Dockerfile", dockerfile.as_bytes())?;

    let profile_ref = match seccomp {
        SeccompProfile::Default => None,
        SeccompProfile::Unconfined => Some(UNCONFINED_REF.to_string()),
        SeccompProfile::Custom(document) => {
            let name = format!("{}.json", rand_hex(8));
            append_entry(&mut builder, &name, document.as_bytes())?;
            Some(name)
        }
    };

    let archive = builder.into_inner()?;
    Ok(BuildContext {
        archive,
        profile_ref,
    })
}

fn append_entry(builder: &mut tar::Builder<Vec<u8>>, path: &str, contents: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o666);
    builder.append_data(&mut header, path, contents)?;
    Ok(())
}

/// Resolve `.`/`..` and drop empty segments so no entry path can escape
/// the build context root. Returns `None` for paths that normalize to
/// nothing (e.g. `""`, `"."`, `".."`).
pub(crate) fn normalize_path(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// `n` bytes of randomness, hex-encoded.
pub(crate) fn rand_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::MemoryFileSet;
    use pretty_assertions::assert_eq;

    fn entries(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut reader = tar::Archive::new(archive);
        reader
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let path = entry.path().unwrap().to_string_lossy().into_owned();
                let mut contents = Vec::new();
                entry.read_to_end(&mut contents).unwrap();
                (path, contents)
            })
            .collect()
    }

    #[test]
    fn archive_holds_files_plus_trailing_dockerfile() {
        let mut files = MemoryFileSet::new();
        files.push("main.sh", "echo hi").push("lib/util.sh", "true");

        let context = assemble(&files, "FROM alpine", &SeccompProfile::Default).unwrap();
        let entries = entries(&context.archive);

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], ("main.sh".to_string(), b"echo hi".to_vec()));
        assert_eq!(entries[1], ("lib/util.sh".to_string(), b"true".to_vec()));
        assert_eq!(entries[2], ("Dockerfile".to_string(), b"FROM alpine".to_vec()));
        assert_eq!(context.profile_ref, None);
    }

    #[test]
    fn empty_set_still_yields_a_dockerfile() {
        let files = MemoryFileSet::new();
        let context = assemble(&files, "FROM scratch", &SeccompProfile::Default).unwrap();
        let entries = entries(&context.archive);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "Dockerfile");
    }

    #[test]
    fn custom_profile_adds_an_entry_under_a_generated_name() {
        let mut files = MemoryFileSet::new();
        files.push("main.sh", "echo hi");
        let profile = SeccompProfile::Custom(r#"{"defaultAction":"SCMP_ACT_ALLOW"}"#.to_string());

        let context = assemble(&files, "FROM alpine", &profile).unwrap();
        let entries = entries(&context.archive);

        assert_eq!(entries.len(), 3);
        let name = context.profile_ref.unwrap();
        assert_eq!(name.len(), 16 + ".json".len());
        assert!(name.ends_with(".json"));
        assert_eq!(entries[2].0, name);
        assert_eq!(entries[2].1, br#"{"defaultAction":"SCMP_ACT_ALLOW"}"#);
    }

    #[test]
    fn unconfined_profile_is_referenced_but_never_embedded() {
        let files = MemoryFileSet::new();
        let context = assemble(&files, "FROM alpine", &SeccompProfile::Unconfined).unwrap();
        assert_eq!(entries(&context.archive).len(), 1);
        assert_eq!(context.profile_ref.as_deref(), Some("unconfined"));
    }

    #[test]
    fn generated_profile_names_differ_between_runs() {
        let profile = SeccompProfile::Custom("{}".to_string());
        let files = MemoryFileSet::new();
        let first = assemble(&files, "FROM alpine", &profile).unwrap();
        let second = assemble(&files, "FROM alpine", &profile).unwrap();
        assert_ne!(first.profile_ref, second.profile_ref);
    }

    #[test]
    fn traversal_paths_are_contained() {
        let mut files = MemoryFileSet::new();
        files.push("../../etc/passwd", "oops");

        let context = assemble(&files, "FROM alpine", &SeccompProfile::Default).unwrap();
        let entries = entries(&context.archive);
        assert_eq!(entries[0].0, "etc/passwd");
    }

    #[test]
    fn degenerate_paths_are_rejected() {
        let mut files = MemoryFileSet::new();
        files.push("..", "oops");
        let err = assemble(&files, "FROM alpine", &SeccompProfile::Default).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidPath(_)));
    }

    #[test]
    fn normalization_is_idempotent() {
        for path in ["a/b/c.txt", "./a//b/../c", "x/./y", "../x"] {
            let once = normalize_path(path).unwrap();
            let twice = normalize_path(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn normalization_never_escapes_the_root() {
        for path in ["../x", "a/../../x", "./../..//x"] {
            let normalized = normalize_path(path).unwrap();
            assert!(!normalized.starts_with('/'));
            assert!(!normalized.split('/').any(|part| part == ".."));
        }
    }

    #[test]
    fn rand_hex_is_hex_of_the_requested_width() {
        let id = rand_hex(16);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
