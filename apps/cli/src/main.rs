//! ConceptGraph CLI: turn instructional documents into a concept graph.
//!
//! Extracts text and OCR content from PDF, PPTX and HTML sources, has a
//! generation model structure it into concepts, procedures and assessments,
//! and stores the result as a browsable graph.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
