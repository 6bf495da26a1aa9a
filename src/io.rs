//! File I/O helpers built on top of the stage API.
//!
//! These wrap reads and writes into ordinary source and unary stages, so
//! file contents flow through the graph like any other value. A write
//! produces an opaque unit-valued port; wiring a read after that port is
//! how write-then-read ordering is expressed.
//!
//! The actual I/O happens at run time, on a worker thread. Failures carry
//! the underlying [`std::io::Error`] and surface from
//! [`Pipeline::run`](crate::Pipeline::run) as [`Error::Io`].

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use crate::engine::Port;
use crate::error::Error;
use crate::pipeline::Pipeline;

/// Registers a source stage that reads `path` to a string.
pub fn read_to_string(
    pipeline: &mut Pipeline,
    key: impl AsRef<str>,
    path: impl AsRef<Utf8Path>,
) -> Result<Port<String>, Error> {
    let path = path.as_ref().to_owned();

    pipeline.add_source(key, move || read(&path))
}

/// Registers a unary stage that writes its input string to `path`,
/// creating parent directories as needed. The returned unit port orders
/// downstream stages after the write.
pub fn write_string(
    pipeline: &mut Pipeline,
    key: impl AsRef<str>,
    path: impl AsRef<Utf8Path>,
    input: &Port<String>,
) -> Result<Port<()>, Error> {
    let path = path.as_ref().to_owned();

    pipeline.add_stage(
        key,
        move |text: &String| {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create directory '{dir}'"))?;
            }

            std::fs::write(&path, text).with_context(|| format!("failed to write '{path}'"))?;

            Ok(())
        },
        input.clone(),
    )
}

/// Registers a stage that reads `path` to a string once `after` has
/// completed, typically the unit port of a [`write_string`] stage.
pub fn read_after(
    pipeline: &mut Pipeline,
    key: impl AsRef<str>,
    path: impl AsRef<Utf8Path>,
    after: &Port<()>,
) -> Result<Port<String>, Error> {
    let path = path.as_ref().to_owned();

    pipeline.add_stage(key, move |_: &()| read(&path), after.clone())
}

fn read(path: &Utf8PathBuf) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read '{path}'"))
}
