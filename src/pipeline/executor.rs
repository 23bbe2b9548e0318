//! Per-frame execution of a compiled scene.

use super::{Dimensions, Scene, Target};
use crate::gpu::RenderContext;
use crate::media::FrameSource;
use tracing::{debug, trace};

/// What a call to [`draw`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    /// Every pass ran and the frame was presented.
    Drawn { layers: usize },
    /// The media had no frame yet; nothing was touched.
    SourceNotReady,
    /// The device is gone; nothing was touched.
    ContextLost,
}

/// Runs every layer of `scene` in order against the current media frame.
pub fn draw<C: RenderContext + ?Sized>(
    ctx: &mut C,
    source: &mut dyn FrameSource,
    scene: &Scene,
) -> DrawOutcome {
    if ctx.is_lost() {
        return DrawOutcome::ContextLost;
    }
    if !source.has_current_data() {
        trace!("Frame source not ready, skipping frame");
        return DrawOutcome::SourceNotReady;
    }
    let Some(frame) = source.current_frame() else {
        return DrawOutcome::SourceNotReady;
    };

    for layer in &scene.layers {
        let input = scene.binding(layer.source);
        let framebuffer = match layer.target {
            Target::Binding(id) => scene.binding(id).framebuffer,
            Target::Screen => None,
        };

        ctx.bind_framebuffer(framebuffer);
        ctx.bind_texture(input.texture);
        if input.framebuffer.is_none() {
            ctx.upload_frame(input.texture, frame, input.flip_y);
        }

        ctx.use_program(layer.program.program);
        for attr in &layer.attributes {
            ctx.vertex_attribute(attr.location, attr.buffer, attr.layout);
        }
        for uniform in &layer.uniforms {
            let values = uniform.data.get();
            let len = values.len().min(uniform.component_count as usize);
            ctx.uniform(uniform.location, uniform.component_type, &values[..len]);
        }

        ctx.draw_arrays(layer.mode, 0, layer.vertex_count);
    }

    ctx.finish_frame();
    DrawOutcome::Drawn {
        layers: scene.layers.len(),
    }
}

/// Brings the backing store in line with `dimensions`, or with the display
/// size when none are given or one side is zero.
///
/// Framebuffer targets of `scene` that do not match the backing store are
/// reallocated at its size. The media texture and the screen are left
/// alone. The viewport is always reset to the backing store. Returns
/// whether the backing store changed.
pub fn resize<C: RenderContext + ?Sized>(
    ctx: &mut C,
    dimensions: Option<Dimensions>,
    scene: Option<&mut Scene>,
) -> bool {
    let (width, height) = match dimensions.and_then(Dimensions::non_zero) {
        Some(d) => (d.width, d.height),
        None => ctx.display_size(),
    };
    if width == 0 || height == 0 {
        trace!("Zero sized surface, keeping drawing buffer");
        let (width, height) = ctx.backing_size();
        ctx.viewport(width, height);
        return false;
    }

    let resized = ctx.backing_size() != (width, height);
    if resized {
        debug!(width, height, "Resizing drawing buffer");
        ctx.set_backing_size(width, height);
    }

    if let Some(Scene { bindings, layers }) = scene {
        for layer in layers.iter() {
            let Target::Binding(id) = layer.target else {
                continue;
            };
            let target = &mut bindings[id.0];
            if target.framebuffer.is_none() || (target.width, target.height) == (width, height) {
                continue;
            }
            ctx.resize_texture(target.texture, width, height);
            target.width = width;
            target.height = height;
            ctx.bind_texture(bindings[layer.source.0].texture);
        }
    }

    let (width, height) = ctx.backing_size();
    ctx.viewport(width, height);
    resized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{AttributeSpec, EffectDescriptor, UniformSpec};
    use crate::effects;
    use crate::frame::{PixelFormat, VideoFrame};
    use crate::gpu::{Call, DrawMode, RecordingContext, RecordingSurface};
    use crate::pipeline::{build, Compiled};

    fn frame() -> Option<VideoFrame> {
        Some(VideoFrame::new(4, 2, PixelFormat::Rgba))
    }

    fn compiled(surface: &mut RecordingSurface, effects: &[EffectDescriptor]) -> Compiled<RecordingContext> {
        let compiled = build(surface, effects, None).unwrap();
        surface.clear_calls();
        compiled
    }

    #[test]
    fn test_draw_runs_layers_in_order() {
        let mut surface = RecordingSurface::new(640, 480);
        let Compiled { mut context, scene } =
            compiled(&mut surface, &[effects::passthrough(), effects::duotone()]);

        let outcome = draw(&mut context, &mut frame(), &scene);
        assert_eq!(outcome, DrawOutcome::Drawn { layers: 2 });

        let calls = surface.calls();
        let first = &scene.layers()[0];
        let second = &scene.layers()[1];
        let intermediate = scene.binding(second.source);
        let media = scene.binding(first.source);

        assert_eq!(calls[0], Call::BindFramebuffer(intermediate.framebuffer));
        assert_eq!(calls[1], Call::BindTexture(media.texture));
        assert_eq!(
            calls[2],
            Call::UploadFrame { texture: media.texture, width: 4, height: 2, flip_y: true }
        );
        assert_eq!(calls[3], Call::UseProgram(first.program.program));

        let second_pass = calls.iter().position(|c| *c == Call::BindFramebuffer(None)).unwrap();
        assert_eq!(calls[second_pass + 1], Call::BindTexture(intermediate.texture));
        assert_eq!(calls[second_pass + 2], Call::UseProgram(second.program.program));

        let uploads = calls.iter().filter(|c| matches!(c, Call::UploadFrame { .. })).count();
        assert_eq!(uploads, 1);
        assert_eq!(calls.last(), Some(&Call::FinishFrame));
    }

    #[test]
    fn test_draw_binds_attributes_and_draws_the_quad() {
        let mut surface = RecordingSurface::new(640, 480);
        let Compiled { mut context, scene } = compiled(&mut surface, &[effects::passthrough()]);

        draw(&mut context, &mut frame(), &scene);
        let calls = surface.calls();

        let attributes = calls.iter().filter(|c| matches!(c, Call::VertexAttribute { .. })).count();
        assert_eq!(attributes, 2);
        assert!(calls.contains(&Call::DrawArrays { mode: DrawMode::TriangleStrip, first: 0, count: 4 }));
    }

    #[test]
    fn test_uniform_changes_reach_next_draw() {
        let mut surface = RecordingSurface::new(640, 480);
        let effect = effects::brightness_contrast();
        let brightness = effect.uniform("u_brightness").unwrap().data.clone();
        let Compiled { mut context, scene } = compiled(&mut surface, &[effect]);
        let location = scene.layers()[0]
            .uniforms
            .iter()
            .find(|u| u.name == "u_brightness")
            .unwrap()
            .location;

        draw(&mut context, &mut frame(), &scene);
        brightness.set(vec![1.5]);
        draw(&mut context, &mut frame(), &scene);

        let values: Vec<Vec<f32>> = surface
            .uniform_uploads()
            .into_iter()
            .filter(|(loc, _)| *loc == location)
            .map(|(_, values)| values)
            .collect();
        assert_eq!(values, vec![vec![1.0], vec![1.5]]);
    }

    #[test]
    fn test_uniform_upload_uses_declared_component_count() {
        let mut surface = RecordingSurface::new(640, 480);
        let mut effect = effects::brightness_contrast();
        effect.uniforms = vec![
            UniformSpec::float("u_brightness", vec![0.5, 9.0, 9.0]),
            UniformSpec::float("u_contrast", vec![2.0]),
        ];
        effect.uniforms[0].component_count = 1;
        let Compiled { mut context, scene } = compiled(&mut surface, &[effect]);

        draw(&mut context, &mut frame(), &scene);
        let uploads = surface.uniform_uploads();
        assert!(uploads.iter().any(|(_, values)| *values == vec![0.5]));
        assert!(uploads.iter().all(|(_, values)| values.len() == 1));
    }

    #[test]
    fn test_not_ready_source_touches_nothing() {
        let mut surface = RecordingSurface::new(640, 480);
        let Compiled { mut context, scene } = compiled(&mut surface, &[effects::passthrough()]);

        let outcome = draw(&mut context, &mut None::<VideoFrame>, &scene);
        assert_eq!(outcome, DrawOutcome::SourceNotReady);
        assert!(surface.calls().is_empty());
    }

    #[test]
    fn test_lost_context_touches_nothing() {
        let mut surface = RecordingSurface::new(640, 480);
        let Compiled { mut context, scene } = compiled(&mut surface, &[effects::passthrough()]);
        surface.lose_context();

        assert_eq!(draw(&mut context, &mut frame(), &scene), DrawOutcome::ContextLost);
        assert!(surface.calls().is_empty());
    }

    #[test]
    fn test_triangle_list_effects_draw_six_vertices() {
        let mut surface = RecordingSurface::new(640, 480);
        let Compiled { mut context, scene } = compiled(&mut surface, &[effects::hue_saturation()]);

        draw(&mut context, &mut frame(), &scene);
        assert!(surface
            .calls()
            .contains(&Call::DrawArrays { mode: DrawMode::Triangles, first: 0, count: 6 }));
    }

    #[test]
    fn test_unused_attribute_is_skipped() {
        let mut surface = RecordingSurface::new(640, 480);
        let mut effect = effects::passthrough();
        effect.attributes.push(AttributeSpec::float("a_unused", 1, vec![0.0; 4]));
        let Compiled { scene, .. } = compiled(&mut surface, &[effect]);

        assert_eq!(scene.layers()[0].attributes.len(), 2);
    }

    #[test]
    fn test_explicit_dimensions_set_backing_store() {
        let mut surface = RecordingSurface::new(1280, 720);
        let Compiled { mut context, mut scene } =
            compiled(&mut surface, &[effects::passthrough(), effects::passthrough()]);

        let resized = resize(
            &mut context,
            Some(Dimensions { width: 850, height: 480 }),
            Some(&mut scene),
        );
        assert!(resized);
        assert_eq!(surface.backing_size(), (850, 480));
        assert!(surface.calls().contains(&Call::Viewport { width: 850, height: 480 }));

        let target = scene.binding(scene.layers()[1].source);
        assert_eq!((target.width, target.height), (850, 480));
        assert_eq!(surface.texture_size(target.texture), Some((850, 480)));

        let media = scene.binding(scene.layers()[0].source);
        assert_eq!(surface.texture_size(media.texture), Some((1, 1)));
    }

    #[test]
    fn test_unchanged_display_size_is_not_a_resize() {
        let mut surface = RecordingSurface::new(640, 480);
        let Compiled { mut context, mut scene } = compiled(&mut surface, &[effects::passthrough()]);

        assert!(resize(&mut context, None, Some(&mut scene)));
        assert_eq!(surface.backing_size(), (640, 480));
        surface.clear_calls();

        assert!(!resize(&mut context, None, Some(&mut scene)));
        assert_eq!(surface.backing_size(), (640, 480));
        assert_eq!(surface.calls(), vec![Call::Viewport { width: 640, height: 480 }]);
    }

    #[test]
    fn test_display_change_is_followed() {
        let mut surface = RecordingSurface::new(640, 480);
        let Compiled { mut context, .. } = compiled(&mut surface, &[effects::passthrough()]);

        resize(&mut context, None, None);
        surface.set_display_size(800, 600);
        assert!(resize(&mut context, None, None));
        assert_eq!(surface.backing_size(), (800, 600));
    }

    #[test]
    fn test_zero_sided_dimensions_fall_back_to_display() {
        let mut surface = RecordingSurface::new(640, 480);
        let Compiled { mut context, mut scene } =
            compiled(&mut surface, &[effects::passthrough(), effects::passthrough()]);

        assert!(resize(&mut context, Some(Dimensions { width: 0, height: 0 }), Some(&mut scene)));
        assert_eq!(surface.backing_size(), (640, 480));
        let target = scene.binding(scene.layers()[1].source);
        assert_eq!(surface.texture_size(target.texture), Some((640, 480)));
    }

    #[test]
    fn test_zero_display_size_keeps_backing_store() {
        let mut surface = RecordingSurface::new(0, 0);
        let Compiled { mut context, .. } = compiled(&mut surface, &[effects::passthrough()]);

        assert!(!resize(&mut context, None, None));
        assert_eq!(surface.backing_size(), (300, 150));
    }
}
