use anyhow::Result;
use clap::Parser;
use pocket_stream::normalize;

use super::text_or_stdin;

#[derive(Parser, Debug)]
pub struct NormalizeArgs {
    /// Text to normalize; reads stdin when omitted or `-`
    pub text: Option<String>,
}

pub fn run(args: NormalizeArgs) -> Result<()> {
    let text = text_or_stdin(args.text)?;
    println!("{}", normalize(&text));
    Ok(())
}
