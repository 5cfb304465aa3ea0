//! Enable/disable lifecycle and the user-facing control file.
//!
//! [`Controller`] owns the probe table and serializes every global
//! transition behind one mutex: zero state, register probes (all or
//! nothing), flip the global gate. [`Interface`] puts a single boolean file
//! at `<debug_root>/rtsl/enable` on top of it, with byte-level read/write
//! semantics matching a debugfs attribute.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::analyzer::Analyzer;
use crate::host::Host;
use crate::probe::{ProbeSet, TracepointRegistry};
use crate::record::RecordSink;

/// Serialized lifecycle control over an [`Analyzer`].
pub struct Controller<H: Host, S: RecordSink, R: TracepointRegistry> {
    analyzer: Arc<Analyzer<H, S>>,
    inner: Mutex<Lifecycle<R>>,
}

struct Lifecycle<R> {
    probes: ProbeSet,
    registry: R,
}

impl<H: Host, S: RecordSink, R: TracepointRegistry> Controller<H, S, R> {
    pub fn new(analyzer: Arc<Analyzer<H, S>>, registry: R) -> Self {
        Self {
            analyzer,
            inner: Mutex::new(Lifecycle {
                probes: ProbeSet::new(),
                registry,
            }),
        }
    }

    pub fn analyzer(&self) -> &Arc<Analyzer<H, S>> {
        &self.analyzer
    }

    pub fn enabled(&self) -> bool {
        self.analyzer.enabled()
    }

    /// Zero every CPU, hook the probes, open the gate. Each CPU then waits
    /// for its initial condition before tracking.
    ///
    /// Fails without side effects if any probe cannot be registered.
    pub fn enable(&self) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.enable_locked(&mut inner)
    }

    /// Close the gate, stop every CPU, unhook the probes, zero state.
    pub fn disable(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.disable_locked(&mut inner);
    }

    fn enable_locked(&self, inner: &mut Lifecycle<R>) -> io::Result<()> {
        self.analyzer.reset_all();
        inner.probes.register_all(&inner.registry)?;
        self.analyzer.set_enabled(true);
        debug!("enabled");
        Ok(())
    }

    fn disable_locked(&self, inner: &mut Lifecycle<R>) {
        self.analyzer.set_enabled(false);
        self.analyzer.stop_all();
        inner.probes.unregister_all(&inner.registry);
        self.analyzer.reset_all();
        debug!("disabled");
    }

    /// Apply one control byte under the lifecycle lock.
    fn apply(&self, byte: u8) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match byte {
            b'1' => {
                // Re-enabling resets: maxima start a fresh epoch.
                if self.enabled() {
                    self.disable_locked(&mut inner);
                }
                self.enable_locked(&mut inner)
            }
            b'0' => {
                if self.enabled() {
                    self.disable_locked(&mut inner);
                }
                Ok(())
            }
            _ => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }
}

/// The control file: one readable/writable boolean at
/// `<debug_root>/rtsl/enable`.
///
/// Reads return a hex digit plus newline. Writes accept `'1'` (enable, or
/// reset if already enabled) and `'0'` (disable). The on-disk file mirrors
/// the current state so external readers of the path see it.
pub struct Interface<H: Host, S: RecordSink, R: TracepointRegistry> {
    controller: Arc<Controller<H, S, R>>,
    dir: PathBuf,
    enable_path: PathBuf,
}

impl<H: Host, S: RecordSink, R: TracepointRegistry> Interface<H, S, R> {
    /// Create `<debug_root>/rtsl/` and the `enable` file inside it.
    pub fn create(debug_root: &Path, controller: Arc<Controller<H, S, R>>) -> Result<Self> {
        let dir = debug_root.join("rtsl");
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let enable_path = dir.join("enable");
        fs::write(&enable_path, b"0\n")
            .with_context(|| format!("failed to create {}", enable_path.display()))?;

        Ok(Self {
            controller,
            dir,
            enable_path,
        })
    }

    pub fn controller(&self) -> &Arc<Controller<H, S, R>> {
        &self.controller
    }

    pub fn enable_path(&self) -> &Path {
        &self.enable_path
    }

    /// Read the boolean at file offset `pos`, at most `count` bytes.
    ///
    /// The backing content is the hex digit, a newline and a NUL
    /// terminator, read like a seekable file: short reads past the end,
    /// empty at EOF.
    pub fn read_data(&self, pos: &mut u64, count: usize) -> Vec<u8> {
        let src = if self.controller.enabled() {
            b"1\n\0"
        } else {
            b"0\n\0"
        };

        let offset = (*pos as usize).min(src.len());
        let n = count.min(src.len() - offset);
        *pos += n as u64;
        src[offset..offset + n].to_vec()
    }

    /// Write control bytes at file offset `pos`.
    ///
    /// The write length must be 1 to 3 bytes; a write that lands entirely
    /// past the control buffer copies nothing and is a bad address. Returns
    /// the number of bytes consumed.
    pub fn write_data(&self, pos: &mut u64, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() || buf.len() > 3 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        // One control byte plus optional newline; the trailing slot stays
        // NUL so the first byte is unambiguous.
        let mut scratch = [0u8; 3];
        let offset = (*pos as usize).min(scratch.len() - 1);
        let n = buf.len().min(scratch.len() - 1 - offset);
        if n == 0 {
            return Err(io::Error::from_raw_os_error(libc::EFAULT));
        }
        scratch[offset..offset + n].copy_from_slice(&buf[..n]);
        *pos += n as u64;

        self.controller.apply(scratch[0])?;
        self.sync_file();
        Ok(n)
    }

    /// Mirror the current state into the on-disk file.
    fn sync_file(&self) {
        let content: &[u8] = if self.controller.enabled() {
            b"1\n"
        } else {
            b"0\n"
        };
        if let Err(err) = fs::write(&self.enable_path, content) {
            warn!(path = %self.enable_path.display(), error = %err, "control file update failed");
        }
    }
}

impl<H: Host, S: RecordSink, R: TracepointRegistry> Drop for Interface<H, S, R> {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.enable_path) {
            warn!(path = %self.enable_path.display(), error = %err, "control file removal failed");
        }
        if let Err(err) = fs::remove_dir(&self.dir) {
            warn!(path = %self.dir.display(), error = %err, "control dir removal failed");
        }
        self.controller.disable();
    }
}
