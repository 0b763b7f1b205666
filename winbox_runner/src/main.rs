// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

fn main() -> anyhow::Result<()> {
    use clap::Parser as _;
    use winbox_runner::CliArgs;
    winbox_runner::run(CliArgs::parse())
}
