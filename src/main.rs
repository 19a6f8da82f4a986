use anyhow::Context;
use clap::Parser;

use handcast::config::Config;
use handcast::pipeline::MediaPipeHands;
use handcast::server::{Server, Session};
use handcast::webcam::Webcam;

fn main() -> anyhow::Result<()> {
    handcast::init_logger!();

    let config = Config::parse();
    config.validate()?;
    log::debug!("{:?}", config);

    let hands = MediaPipeHands::load(
        &config.palm_model,
        &config.landmark_model,
        config.detector_options(),
    )?;

    let server = Server::bind(config.addr())
        .with_context(|| format!("cannot listen on {}:{}", config.host, config.port))?;
    let stream = server.accept()?;

    // The camera is only opened once somebody is there to receive the frames.
    let webcam = Webcam::open(config.webcam_options())?;

    let summary = Session::new(webcam, hands, stream, config.schema).run()?;
    log::info!(
        "sent {} frames ({} skipped), exiting",
        summary.frames_sent,
        summary.frames_skipped,
    );

    Ok(())
}
