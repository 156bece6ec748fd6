//! Prefix a `hash` mode signature to a command.
//!
//! ```text
//! SIGNING_SECRET=s3cret tradegate-sign buy BTC 1
//! sig:e98f2c5b8f89ae79 buy BTC 1
//! ```

use std::env;

use anyhow::{bail, Context, Result};

use tradegate::web::sign_and_prepend;

fn main() -> Result<()> {
    let secret = env::var("SIGNING_SECRET").context("SIGNING_SECRET must be set")?;

    let message = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if message.trim().is_empty() {
        bail!("usage: tradegate-sign <command text>");
    }

    let signed = sign_and_prepend(&message, &secret).context("Failed to compute signature")?;
    println!("{}", signed);

    Ok(())
}
