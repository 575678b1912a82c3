//! The option vocabulary shared with the compiler driver.
//!
//! None of this participates in backend correctness; it exists so the
//! driver, the tests and the documentation agree on how a target, a memory
//! model and the debug dumps are named. Unknown names are user-facing
//! usage errors reported on the diagnostic stream with a non-zero exit,
//! not compiler bugs.

use crate::ir::MemModel;
use crate::isa::{self, Target};
use clap::Parser;
use thiserror::Error;

/// Driver options.
#[derive(Debug, Parser)]
#[command(name = "mica", about = "SSA compiler backend driver")]
pub struct Options {
    /// Target to generate code for.
    #[arg(short = 't', long = "target", default_value = "i8086")]
    pub target: String,

    /// Memory model (i8086 only): tiny, small, medium, compact, large,
    /// huge.
    #[arg(short = 'm', long = "memory-model")]
    pub memory_model: Option<String>,

    /// Output file, or `-` for stdout.
    #[arg(short = 'o', long = "output", default_value = "-")]
    pub output: String,

    /// Stage-dump flags: A (abi), I (isel), E (emission).
    #[arg(short = 'd', long = "debug", default_value = "")]
    pub debug: String,

    /// Reject unimplemented opcode/class pairs instead of emitting
    /// placeholder comments.
    #[arg(long)]
    pub strict: bool,

    /// Input files, or `-` for stdin.
    pub files: Vec<String>,
}

/// A user-facing option error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("unknown target '{0}'")]
    UnknownTarget(String),
    #[error("unknown memory model '{0}' (valid: tiny, small, medium, compact, large, huge)")]
    UnknownModel(String),
    #[error("the memory model option requires the i8086 target")]
    ModelNeedsI8086,
}

impl Options {
    /// Resolve the target and memory model named on the command line.
    pub fn resolve(&self) -> Result<(&'static Target, MemModel), UsageError> {
        let target =
            isa::lookup(&self.target).ok_or_else(|| UsageError::UnknownTarget(self.target.clone()))?;
        let model = match &self.memory_model {
            None => target.default_model,
            Some(name) => {
                if target.name != "i8086" {
                    return Err(UsageError::ModelNeedsI8086);
                }
                MemModel::from_name(name).ok_or_else(|| UsageError::UnknownModel(name.clone()))?
            }
        };
        Ok((target, model))
    }

    /// Initialize logging from the stage-dump flag letters. Unrecognized
    /// letters enable everything.
    pub fn init_logging(&self) {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        for c in self.debug.chars() {
            let module = match c.to_ascii_uppercase() {
                'A' => Some("mica_codegen::isa::x86_16::abi"),
                'I' => Some("mica_codegen::isa::x86_16::lower"),
                'E' => Some("mica_codegen::isa::x86_16::emit"),
                _ => None,
            };
            match module {
                Some(m) => {
                    builder.filter_module(m, log::LevelFilter::Debug);
                }
                None => {
                    builder.filter_level(log::LevelFilter::Debug);
                }
            }
        }
        let _ = builder.try_init();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn opts(args: &[&str]) -> Options {
        Options::parse_from(std::iter::once("mica").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let o = opts(&[]);
        let (t, model) = o.resolve().unwrap();
        assert_eq!(t.name, "i8086");
        assert_eq!(model, MemModel::Small);
    }

    #[test]
    fn model_selection() {
        let o = opts(&["-m", "huge"]);
        let (_, model) = o.resolve().unwrap();
        assert_eq!(model, MemModel::Huge);
    }

    #[test]
    fn model_names_are_case_sensitive() {
        let o = opts(&["-m", "Huge"]);
        assert_eq!(
            o.resolve().unwrap_err(),
            UsageError::UnknownModel("Huge".to_string())
        );
    }

    #[test]
    fn unknown_target_is_a_usage_error() {
        let o = opts(&["-t", "z80"]);
        assert_eq!(
            o.resolve().unwrap_err(),
            UsageError::UnknownTarget("z80".to_string())
        );
    }

    #[test]
    fn all_six_models_parse() {
        for name in ["tiny", "small", "medium", "compact", "large", "huge"] {
            let o = opts(&["-m", name]);
            assert!(o.resolve().is_ok(), "{}", name);
        }
    }
}
