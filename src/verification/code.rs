use rand::rngs::OsRng;
use rand::Rng;

/// Number of digits in a one-time code.
pub const CODE_LENGTH: usize = 6;

const CODE_SPACE: u32 = 1_000_000;

/// Generates a six-digit one-time code, zero-padded (`000000`..=`999999`).
///
/// Drawn from the operating system CSPRNG; `gen_range` is uniform over the
/// range so no digit pattern is favoured.
pub fn generate_code() -> String {
    let value = OsRng.gen_range(0..CODE_SPACE);
    format!("{:0width$}", value, width = CODE_LENGTH)
}
