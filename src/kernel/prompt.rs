//! Interactive kernel selection.
//!
//! Prints the available trees as a numbered list and reads a choice. This
//! is the only point where an operator can back out before anything on the
//! system is changed.

use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};

/// Ask the operator to pick one of `kernels`; returns the chosen name.
///
/// Re-prompts on non-numeric or out-of-range input. End of input cancels.
pub fn choose_kernel<R, W>(system: &str, kernels: &[String], input: &mut R, out: &mut W) -> Result<String>
where
    R: BufRead,
    W: Write,
{
    if kernels.is_empty() {
        bail!("no kernels to choose from");
    }

    writeln!(out, "Here is a list of available kernels for {system}:\n")?;
    for (idx, name) in kernels.iter().enumerate() {
        writeln!(out, "{}. {}", idx + 1, name)?;
    }

    loop {
        write!(out, "\nPlease select a kernel version: ")?;
        out.flush()?;

        let mut line = String::new();
        let read = input.read_line(&mut line).context("reading kernel selection")?;
        if read == 0 {
            bail!("kernel selection cancelled");
        }

        let answer = line.trim();
        match answer.parse::<usize>() {
            Ok(n) if (1..=kernels.len()).contains(&n) => return Ok(kernels[n - 1].clone()),
            Ok(_) => {
                writeln!(out, "\nInvalid selection: \"{answer}\"")?;
                writeln!(out, "Please try again.")?;
            }
            Err(_) => {
                writeln!(out, "\nInvalid selection: \"{answer}\"")?;
                writeln!(out, "Please enter an integer.")?;
            }
        }
    }
}
