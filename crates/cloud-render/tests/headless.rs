// tests/headless.rs
// End-to-end rendering on whatever adapter the machine offers.
// Every test returns early when no adapter is available.

use cloud_render::camera::{
    ndc_to_pixel, CameraIntrinsics, OcamParams, OpenCvParams, PerspectiveParams,
};
use cloud_render::renderer::RendererStage;
use cloud_render::{
    CameraDescriptor, GfxContext, PointCloud, PointCloudRenderer, Pose, Primitive, QuaternionOrder,
    ReadbackPipeline, RenderError,
};
use glam::Vec3;
use std::collections::BTreeSet;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn gpu_or_skip(width: u32, height: u32) -> Option<GfxContext> {
    match GfxContext::acquire(width, height) {
        Ok(gfx) => Some(gfx),
        Err(err) => {
            eprintln!("skipping: {err}");
            None
        }
    }
}

fn descriptor() -> CameraDescriptor {
    CameraDescriptor {
        image_size: [WIDTH, HEIGHT],
        far:        20.0,
        intrinsics: CameraIntrinsics::Perspective(PerspectiveParams {
            fov_deg: 60.0,
            near:    0.1,
        }),
    }
}

/// Point 0 above the optical axis, point 1 below it, point 2 off to the left.
fn scene() -> PointCloud {
    PointCloud::new(
        vec![[0.2, -1.0, 5.0], [0.2, 1.0, 5.0], [-1.5, 0.1, 5.0]],
        vec![[255, 0, 0], [0, 255, 0], [0, 0, 255]],
    )
    .unwrap()
}

fn identity() -> Pose {
    Pose::new([0.0; 3], [0.0, 0.0, 0.0, 1.0], QuaternionOrder::Xyzw).unwrap()
}

/// Mild barrel distortion, principal point slightly off center.
fn opencv_descriptor() -> CameraDescriptor {
    CameraDescriptor {
        image_size: [WIDTH, HEIGHT],
        far:        20.0,
        intrinsics: CameraIntrinsics::OpenCv(OpenCvParams {
            focal:      [40.0, 40.0],
            center:     [31.0, 25.0],
            distortion: vec![-0.1, 0.01, 0.001, -0.001, 0.0],
        }),
    }
}

/// Wide fisheye centered on the image.
fn ocam_descriptor() -> CameraDescriptor {
    CameraDescriptor {
        image_size: [WIDTH, HEIGHT],
        far:        20.0,
        intrinsics: CameraIntrinsics::Ocam(OcamParams {
            cam2world: vec![-30.0, 0.0, 0.01],
            world2cam: vec![30.0, 10.0],
            center:    [24.0, 32.0],
            affine:    [1.0, 0.0, 0.0],
            fov_deg:   200.0,
        }),
    }
}

fn loaded_renderer(primitive: Primitive) -> Option<PointCloudRenderer> {
    renderer_with(&descriptor(), primitive)
}

fn renderer_with(descriptor: &CameraDescriptor, primitive: Primitive) -> Option<PointCloudRenderer> {
    let gfx = gpu_or_skip(WIDTH, HEIGHT)?;
    let mut renderer = PointCloudRenderer::new(gfx);
    renderer.init_gpu().unwrap();
    renderer.init_context(&scene(), descriptor, primitive).unwrap();
    renderer.locate_camera(&identity()).unwrap();
    Some(renderer)
}

/// Pixels holding `id`, as (column, row).
fn pixels_with_id(ids: &cloud_render::renderer::IdImage, id: i32) -> Vec<(u32, u32)> {
    ids.enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] == id)
        .map(|(x, y, _)| (x, y))
        .collect()
}

#[test]
fn stages_must_run_in_order() {
    let Some(gfx) = gpu_or_skip(WIDTH, HEIGHT) else { return };
    let mut renderer = PointCloudRenderer::new(gfx);
    assert_eq!(renderer.stage(), RendererStage::Uninitialized);

    let err = renderer.init_context(&scene(), &descriptor(), Primitive::Points).unwrap_err();
    assert!(matches!(err, RenderError::InvalidState(_)));
    assert!(matches!(renderer.draw().unwrap_err(), RenderError::InvalidState(_)));

    renderer.init_gpu().unwrap();
    assert_eq!(renderer.stage(), RendererStage::ContextReady);
    assert!(matches!(renderer.draw().unwrap_err(), RenderError::InvalidState(_)));

    renderer.init_context(&scene(), &descriptor(), Primitive::Points).unwrap();
    assert_eq!(renderer.stage(), RendererStage::SceneLoaded);
    renderer.draw().unwrap();
}

#[test]
fn resize_reallocates_and_releases_attachments() {
    let Some(gfx) = gpu_or_skip(WIDTH, HEIGHT) else { return };
    let mut renderer = PointCloudRenderer::new(gfx);
    renderer.init_gpu().unwrap();
    assert_eq!(renderer.framebuffer().dims(), Some((WIDTH, HEIGHT)));
    assert_eq!(renderer.framebuffer().allocations(), 1);

    renderer.resize(32, 24).unwrap();
    assert_eq!(renderer.framebuffer().dims(), Some((32, 24)));
    assert_eq!(renderer.framebuffer().allocations(), 2);
    assert_eq!(renderer.framebuffer().releases(), 1);

    // Same size again is a no-op.
    renderer.resize(32, 24).unwrap();
    assert_eq!(renderer.framebuffer().allocations(), 2);

    let color = renderer.read_color().unwrap();
    assert_eq!(color.dimensions(), (32, 24));
}

#[test]
fn id_buffer_holds_one_id_per_visible_point() {
    let Some(mut renderer) = loaded_renderer(Primitive::Points) else { return };
    renderer.draw().unwrap();
    let (color, ids) = renderer.read_color_and_ids().unwrap();

    let seen: BTreeSet<i32> = ids.pixels().map(|p| p.0[0]).collect();
    assert_eq!(seen, BTreeSet::from([-1, 0, 1, 2]));

    let camera = renderer.camera().unwrap();
    for (id, rgb) in [(0, [255, 0, 0]), (1, [0, 255, 0]), (2, [0, 0, 255])] {
        let hits = pixels_with_id(&ids, id);
        assert!(!hits.is_empty(), "point {id} not drawn");
        for &(x, y) in &hits {
            assert_eq!(color.get_pixel(x, y).0, rgb);
        }

        // The CPU projection predicts where the point lands.
        let p = camera.project_world(Vec3::from(scene().positions[id as usize])).unwrap();
        let px = ndc_to_pixel(p.truncate(), (WIDTH, HEIGHT));
        let (x, y) = hits[0];
        assert!((px.x - (x as f32 + 0.5)).abs() <= 1.0, "{px:?} vs {x}");
        assert!((px.y - (y as f32 + 0.5)).abs() <= 1.0, "{px:?} vs {y}");
    }

    // Untouched pixels keep the clear values.
    assert_eq!(ids.get_pixel(0, 0).0[0], -1);
    assert_eq!(color.get_pixel(0, 0).0, [255, 255, 255]);
}

#[test]
fn readback_row_zero_is_the_top_of_the_image() {
    let Some(mut renderer) = loaded_renderer(Primitive::Points) else { return };
    renderer.draw().unwrap();
    let (_, ids) = renderer.read_color_and_ids().unwrap();

    let above = pixels_with_id(&ids, 0)[0];
    let below = pixels_with_id(&ids, 1)[0];
    assert!(above.1 < HEIGHT / 2, "{above:?}");
    assert!(below.1 > HEIGHT / 2, "{below:?}");
}

#[test]
fn depth_is_cleared_to_far_and_written_by_points() {
    let Some(mut renderer) = loaded_renderer(Primitive::Points) else { return };
    renderer.draw().unwrap();
    let readback = renderer.read(cloud_render::ReadbackSet::All).unwrap();
    let ids = readback.ids.unwrap();
    let depth = readback.depth.unwrap();

    assert_eq!(depth.get_pixel(0, 0).0[0], 1.0);
    let (x, y) = pixels_with_id(&ids, 2)[0];
    let d = depth.get_pixel(x, y).0[0];
    assert!(d > 0.0 && d < 1.0, "{d}");
}

/// Draws through the lens shader and checks every point lands where the
/// CPU projection puts it, at the depth it predicts.
fn assert_gpu_matches_cpu(descriptor: CameraDescriptor) {
    let Some(mut renderer) = renderer_with(&descriptor, Primitive::Points) else { return };
    renderer.draw().unwrap();
    let readback = renderer.read(cloud_render::ReadbackSet::All).unwrap();
    let ids = readback.ids.unwrap();
    let depth = readback.depth.unwrap();

    let camera = renderer.camera().unwrap();
    for id in 0..3 {
        let hits = pixels_with_id(&ids, id);
        assert!(!hits.is_empty(), "{}: point {id} not drawn", descriptor.kind());

        let p = camera.project_world(Vec3::from(scene().positions[id as usize])).unwrap();
        let px = ndc_to_pixel(p.truncate(), (WIDTH, HEIGHT));
        let (x, y) = hits[0];
        assert!(
            (px.x - (x as f32 + 0.5)).abs() <= 1.0 && (px.y - (y as f32 + 0.5)).abs() <= 1.0,
            "{}: point {id} at ({x}, {y}), expected {px:?}",
            descriptor.kind()
        );
        let d = depth.get_pixel(x, y).0[0];
        assert!((d - p.z).abs() < 1e-3, "{}: depth {d} vs {}", descriptor.kind(), p.z);
    }
    assert_eq!(ids.get_pixel(0, 0).0[0], -1);
}

#[test]
fn opencv_shader_agrees_with_cpu_projection() {
    assert_gpu_matches_cpu(opencv_descriptor());
}

#[test]
fn ocam_shader_agrees_with_cpu_projection() {
    assert_gpu_matches_cpu(ocam_descriptor());
}

#[test]
fn cubes_cover_several_pixels_with_one_id() {
    let Some(mut renderer) = loaded_renderer(Primitive::Cubes { size: 0.5 }) else { return };
    renderer.draw().unwrap();
    let (_, ids) = renderer.read_color_and_ids().unwrap();
    assert!(pixels_with_id(&ids, 0).len() > 4);
    assert!(pixels_with_id(&ids, 1).len() > 4);
}

#[test]
fn async_pipeline_renders_posed_frames_in_order() {
    let Some(renderer) = loaded_renderer(Primitive::Points) else { return };
    let mut pipeline = ReadbackPipeline::new(renderer, Vec::<image::RgbImage>::new(), 2);
    for i in 0..6u64 {
        let pose = (i % 2 == 0).then(identity);
        pipeline.push(i, pose.as_ref(), None).unwrap();
    }
    let (_, frames, stats) = pipeline.finish().unwrap();

    assert_eq!(frames.len(), 6);
    assert_eq!(stats.rendered, 3);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.dimensions(), (WIDTH, HEIGHT));
        let white = frame.pixels().filter(|p| p.0 == [255, 255, 255]).count();
        if i % 2 == 0 {
            // White background with the three points on it.
            assert!(white > 0 && white < (WIDTH * HEIGHT) as usize);
        } else {
            assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
        }
    }
}

#[test]
fn scoped_gpu_work_reports_validation_errors() {
    let Some(gfx) = gpu_or_skip(WIDTH, HEIGHT) else { return };
    let (_, err) = gfx.scoped(|device| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("invalid usage"),
            size: 256,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        })
    });
    assert!(err.is_some());

    let err = gfx
        .allocate("invalid usage", |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("invalid usage"),
                size: 256,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::UNIFORM,
                mapped_at_creation: false,
            })
        })
        .unwrap_err();
    assert!(matches!(err, RenderError::ResourceExhaustion { .. }));
}
