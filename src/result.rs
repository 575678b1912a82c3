//! Result and error types representing the outcome of compilation.

use thiserror::Error;

/// A compilation error.
///
/// Apart from `Io`, every variant here indicates malformed input reaching a
/// stage that assumes well-formedness, i.e. a bug in an earlier pipeline
/// stage rather than a user-facing input error. There is no recovery path;
/// the driver reports the diagnostic and aborts the compilation.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// A complex memory operand carries a scale other than 0 or 1. The
    /// target has no scaled addressing.
    #[error("memory operand scale {0} unsupported: target allows 0 or 1")]
    UnsupportedScale(u8),

    /// A call target that is neither a register nor a symbolic address
    /// constant. The operand must have been materialized earlier.
    #[error("call target must be a register or a symbolic address")]
    BadCallTarget,

    /// An indirect far call through a register; the pointer must live in
    /// memory for the hardware to address both segment and offset.
    #[error("far call through a register is not encodable")]
    FarIndirectCall,

    /// A stack allocate/deallocate whose size operand is not a constant.
    #[error("stack adjustment requires a constant size operand")]
    NonConstStackAdjust,

    /// An 8-bit register operand was requested for a register without a
    /// byte-addressable half.
    #[error("register {0} has no byte-addressable half")]
    NoByteHalf(String),

    /// An argument marker not attached to a call instruction.
    #[error("argument marker without an enclosing call")]
    MalformedCallSite,

    /// A call destination of floating-point class. Degrading it would
    /// silently corrupt the caller, so it is rejected outright.
    #[error("floating-point call results are not supported")]
    FloatCallResult,

    /// A virtual register survived to a point where only physical registers
    /// and frame slots are meaningful.
    #[error("virtual register {0} reached emission unallocated")]
    UnallocatedReg(String),

    /// An opcode/class pair with no emission handler, in strict mode.
    #[error("unhandled operation {op} for class {cls}")]
    Unhandled { op: String, cls: String },

    /// An instruction or operand shape that no stage should have produced.
    #[error("invalid IR: {0}")]
    InvalidIr(&'static str),

    /// An error writing to the output stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error.
pub type CodegenResult<T> = Result<T, CodegenError>;
