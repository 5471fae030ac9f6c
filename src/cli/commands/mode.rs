//! Mode command - read the recording mode from a .set header

use crate::cli::args::ModeArgs;
use crate::error::StashResult;
use crate::recording::header::{get_mode, SetHeader};

/// Execute the mode command
pub async fn execute(args: ModeArgs) -> StashResult<()> {
    match args.channel {
        Some(channel) => {
            let header = SetHeader::open(&args.set_file).await?;
            println!("{}", header.mode(channel)?);
        }
        None => println!("{}", get_mode(&args.set_file).await?),
    }
    Ok(())
}
