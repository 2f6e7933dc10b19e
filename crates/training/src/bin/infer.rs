use clap::Parser;
use training::{run_infer, InferArgs};

fn main() -> anyhow::Result<()> {
    let args = InferArgs::parse();
    run_infer(args)
}
