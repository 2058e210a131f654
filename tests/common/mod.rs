//! Shared test infrastructure for integration tests.

use cfb::CompoundFile;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Scratch directory holding a message, canned model replies, and a config.
pub struct Workspace {
    pub dir: TempDir,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Config path passed as `--config` so tests never read the user's file.
    pub fn config_path(&self) -> PathBuf {
        self.path("config.json")
    }

    /// Write a `.msg` with the given `(name, data)` attachments.
    pub fn write_msg(&self, name: &str, subject: &str, attachments: &[(&str, &[u8])]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, build_msg(subject, attachments)).expect("write msg");
        path
    }

    /// Canned reply served by the mock LM for `attachment`.
    pub fn write_reply(&self, attachment: &str, reply: &str) {
        let dir = self.path("replies");
        std::fs::create_dir_all(&dir).expect("create replies dir");
        std::fs::write(dir.join(format!("{attachment}.json")), reply).expect("write reply");
    }

    /// Shell script that prints `replies/<attachment>.json`, failing when
    /// no reply exists.
    #[cfg(unix)]
    pub fn write_mock_lm(&self) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path("mock-lm.sh");
        let script = format!(
            "#!/bin/sh\ncat > /dev/null\ntest -f \"$1\" || {{ echo \"missing document\" >&2; exit 2; }}\ncat \"{}/replies/$CRECON_ATTACHMENT.json\"\n",
            self.dir.path().display()
        );
        std::fs::write(&path, script).expect("write mock lm");
        let mut perms = std::fs::metadata(&path).expect("stat mock lm").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod mock lm");
        path
    }

    /// Run `crecon` inside the workspace with a clean `CRECON_*` environment.
    pub fn crecon(&self, args: &[&str]) -> Output {
        let config = self.config_path();
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_crecon"));
        cmd.arg("--config")
            .arg(&config)
            .args(args)
            .current_dir(self.dir.path())
            .env_remove("CRECON_BACKEND")
            .env_remove("CRECON_MODEL")
            .env_remove("CRECON_LM_COMMAND")
            .env_remove("GEMINI_API_KEY")
            .env_remove("RUST_LOG")
            .stdin(Stdio::null());
        cmd.output().expect("run crecon")
    }
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "crecon failed: {}\nstdout:\n{}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

fn write_stream(comp: &mut CompoundFile<Cursor<Vec<u8>>>, path: &Path, bytes: &[u8]) {
    let mut stream = comp.create_stream(path).expect("create stream");
    stream.write_all(bytes).expect("write stream");
}

/// Minimal Outlook message: a subject plus one storage per attachment.
pub fn build_msg(subject: &str, attachments: &[(&str, &[u8])]) -> Vec<u8> {
    let mut comp = CompoundFile::create(Cursor::new(Vec::new())).expect("create compound file");
    let root = PathBuf::from("/");
    write_stream(
        &mut comp,
        &root.join("__substg1.0_0037001F"),
        &encode_utf16le(subject),
    );
    for (index, (name, data)) in attachments.iter().enumerate() {
        let dir = root.join(format!("__attach_version1.0_#{index:08X}"));
        comp.create_storage(&dir).expect("create storage");
        write_stream(&mut comp, &dir.join("__substg1.0_3707001F"), &encode_utf16le(name));
        write_stream(&mut comp, &dir.join("__substg1.0_37010102"), data);
    }
    comp.flush().expect("flush compound file");
    comp.into_inner().into_inner()
}
