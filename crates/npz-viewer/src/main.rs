//! Entry point for the NPZ point cloud viewer.

use anyhow::Result;
use clap::Parser;
use npz_viewer::{
    app::App,
    config::Config,
    data::{prepare_scene, PrepareOptions},
};
use rand::{rngs::StdRng, SeedableRng};
use std::{process::ExitCode, sync::Arc};
use winit::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::WindowBuilder,
};

fn main() -> ExitCode {
    // Initialize logging; default to "info" if RUST_LOG is unset.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = Config::parse();

    let clouds = match pcnpz::load_path(&cfg.path) {
        Ok(clouds) => clouds,
        Err(err) => {
            println!("Error loading file or directory: {err}");
            return ExitCode::FAILURE;
        }
    };

    println!("Loaded {} point cloud(s).", clouds.len());
    for (name, cloud) in &clouds {
        println!("  {name}: {} points", cloud.len());
    }

    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let opts = PrepareOptions {
        chunk_size: cfg.chunk_size,
        max_points_per_chunk: cfg.max_points_per_chunk,
    };
    println!("Processing and adding point clouds to the viewer...");
    let scene = prepare_scene(&clouds, opts, &mut rng);
    // The prepared chunks own their points from here on.
    drop(clouds);

    println!("Original total points: {}", scene.stats.original);
    println!("Downsampled total points: {}", scene.stats.kept);
    println!("Downsampling ratio: {:.2}%", scene.stats.ratio_percent());

    match run_window(&cfg, scene) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("Viewer failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_window(cfg: &Config, scene: npz_viewer::data::Scene) -> Result<()> {
    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("NPZ Point Cloud Viewer")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720))
            .build(&event_loop)?,
    );

    let mut app = pollster::block_on(App::new(window.clone(), cfg.point_size))?;
    app.set_scene(scene);

    println!("Visualization window is now open. Close the window to exit.");

    event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => {
                if !app.handle_event(&window, &event) {
                    match event {
                        WindowEvent::CloseRequested => elwt.exit(),
                        WindowEvent::KeyboardInput { event, .. } => {
                            if event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                                elwt.exit();
                            }
                        }
                        WindowEvent::RedrawRequested => match app.render(&window) {
                            Ok(_) => {}
                            Err(wgpu::SurfaceError::Lost) => {
                                app.resize(app.renderer.gfx.size);
                            }
                            Err(wgpu::SurfaceError::OutOfMemory) => {
                                log::error!("WGPU out of memory, exiting.");
                                elwt.exit();
                            }
                            Err(e) => log::error!("Render error: {:?}", e),
                        },
                        _ => {}
                    }
                }
            }
            Event::AboutToWait => {
                window.request_redraw();
            }
            _ => {}
        }
    })?;

    Ok(())
}
