use std::path::PathBuf;

use face_mosaic::render::backends::cpu::CpuBackend;
use face_mosaic::render::export::ExportFormat;
use face_mosaic::{EngineConfig, EngineError, EngineEvent, MosaicEngine};

/// Usage: render_mosaic <output.png|output.tiff> <image>...
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    env_logger::init();

    let mut args = std::env::args_os().skip(1).map(PathBuf::from);
    let Some(output) = args.next() else {
        eprintln!("usage: render_mosaic <output.png|output.tiff> <image>...");
        std::process::exit(2);
    };
    let images: Vec<PathBuf> = args.collect();
    let format = ExportFormat::from_path(&output)?;

    // Four copies of every face, slightly rotated, on the classic 640x480 canvas
    let config = EngineConfig::builder()
        .iterations(4)
        .max_rotation(0.1)
        .scale(0.3)
        .seed("Seed")
        .build()?;

    let backend = CpuBackend::new()?;
    let mut engine = MosaicEngine::new(Some(config), Box::new(backend))?;
    let mut event_rx = engine.subscribe_events();

    let ids = engine.add_faces(images).await?;
    engine.settle().await;
    println!("loaded {} faces", ids.len());

    let frame = engine.render_frame()?;
    println!(
        "frame {} composited at {} ({} faces ready)",
        frame.frame_id,
        frame.canvas_size,
        engine.faces().ready().count()
    );

    engine.export_snapshot(&output, format).await?;

    while let Ok(event) = event_rx.try_recv() {
        match event {
            EngineEvent::AtlasRebuilt { width, height, faces } => {
                println!("atlas: {faces} faces in {width}x{height}");
            }
            EngineEvent::ExportFinished { path } => println!("wrote {}", path.display()),
            other => log::debug!("event: {:?}", other),
        }
    }

    Ok(())
}
