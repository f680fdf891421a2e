use std::sync::Arc;
use std::thread;

use crate::backend::{NullAeroGpuBackend, RecordedCommand, RecordingAeroGpuBackend};
use crate::command_processor::AeroGpuCommandProcessor;
use crate::error::{MissingBinding, ResourceError, StateError};
use crate::frame_pacing::FramePacer;
use crate::resource_table::{ResourceDesc, ResourceTable, ResourceUsage, Texture2dDesc};

use aero_protocol::aerogpu::aerogpu_cmd::{
    encode_input_layout_blob_le, AerogpuInputLayoutElementDxgi, AerogpuShaderStage, AerogpuVertexBufferBinding,
    AEROGPU_CLEAR_COLOR, AEROGPU_RESOURCE_USAGE_RENDER_TARGET, AEROGPU_RESOURCE_USAGE_TEXTURE,
    AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER,
};
use aero_protocol::aerogpu::aerogpu_pci::AerogpuFormat;
use aero_protocol::aerogpu::cmd_writer::AerogpuCmdWriter;

const TOKEN: u64 = 0x0123_4567_89AB_CDEF;

fn surface(mip_levels: u32) -> ResourceDesc {
    ResourceDesc::Texture2d(Texture2dDesc {
        usage: ResourceUsage::TEXTURE | ResourceUsage::RENDER_TARGET,
        format: AerogpuFormat::B8G8R8A8Unorm,
        width: 32,
        height: 32,
        mip_levels,
        array_layers: 1,
        row_pitch_bytes: 0,
        backing_alloc_id: 0,
        backing_offset_bytes: 0,
    })
}

fn create_surface(w: &mut AerogpuCmdWriter, handle: u32) {
    w.create_texture2d(
        handle,
        AEROGPU_RESOURCE_USAGE_TEXTURE | AEROGPU_RESOURCE_USAGE_RENDER_TARGET,
        AerogpuFormat::B8G8R8A8Unorm as u32,
        32,
        32,
        1,
        1,
        0,
        0,
        0,
    );
}

/// Vertex buffer 1, vertex shader 4 and a one-slot layout 6, all bound.
fn bind_draw_inputs(w: &mut AerogpuCmdWriter) {
    w.create_buffer(1, AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER, 256, 0, 0);
    w.create_shader_dxbc(4, AerogpuShaderStage::Vertex, b"DXBCvs");
    w.create_input_layout(
        6,
        &encode_input_layout_blob_le(&[AerogpuInputLayoutElementDxgi {
            semantic_name_hash: 0x1234,
            semantic_index: 0,
            dxgi_format: 2,
            input_slot: 0,
            aligned_byte_offset: 0,
            input_slot_class: 0,
            instance_data_step_rate: 0,
        }]),
    );
    w.bind_shaders(4, 0, 0);
    w.set_input_layout(6);
    w.set_vertex_buffers(
        0,
        &[AerogpuVertexBufferBinding {
            buffer: 1,
            stride_bytes: 16,
            offset_bytes: 0,
            reserved0: 0,
        }],
    );
}

#[test]
fn import_takes_a_reference_until_last_destroy() {
    let mut table = ResourceTable::default();
    table.create(10, surface(1)).unwrap();
    table.export_shared(10, TOKEN).unwrap();

    assert_eq!(table.import_shared(TOKEN, 20).unwrap(), 10);
    assert_eq!(table.import_shared(TOKEN, 21).unwrap(), 10);
    assert_eq!(table.refcount(10), Some(3));
    assert_eq!(table.refcount(21), Some(3));

    // Destroying the original leaves the aliases working.
    let destroyed = table.destroy(10).unwrap();
    assert!(!destroyed.freed);
    assert!(table.texture2d(20).is_ok());
    // The underlying id stays reserved while aliases are alive.
    assert_eq!(
        table.create(10, surface(1)),
        Err(ResourceError::DuplicateHandle { handle: 10 })
    );

    assert!(!table.destroy(20).unwrap().freed);
    let last = table.destroy(21).unwrap();
    assert_eq!(last.underlying, 10);
    assert!(last.freed);
    assert_eq!(table.live_handles(), 0);

    // Freeing the object retired the token.
    assert!(table.is_token_retired(TOKEN));
    assert_eq!(
        table.import_shared(TOKEN, 22),
        Err(ResourceError::UnknownToken { share_token: TOKEN })
    );
    table.create(11, surface(1)).unwrap();
    assert_eq!(
        table.export_shared(11, TOKEN),
        Err(ResourceError::ShareTokenRetired { share_token: TOKEN })
    );
}

#[test]
fn export_collision_keeps_first_mapping() {
    let mut table = ResourceTable::default();
    table.create(1, surface(1)).unwrap();
    table.create(2, surface(1)).unwrap();

    table.export_shared(1, TOKEN).unwrap();
    table.export_shared(1, TOKEN).unwrap();
    assert_eq!(
        table.export_shared(2, TOKEN),
        Err(ResourceError::Collision {
            share_token: TOKEN,
            existing: 1,
            new: 2,
        })
    );
    assert_eq!(table.lookup_share_token(TOKEN), Some(1));
}

#[test]
fn import_is_idempotent_per_alias() {
    let mut table = ResourceTable::default();
    table.create(1, surface(1)).unwrap();
    table.export_shared(1, TOKEN).unwrap();

    table.import_shared(TOKEN, 5).unwrap();
    table.import_shared(TOKEN, 5).unwrap();
    assert_eq!(table.refcount(1), Some(2));

    // An alias already bound elsewhere cannot be rebound.
    table.create(2, surface(1)).unwrap();
    table.export_shared(2, TOKEN + 1).unwrap();
    assert_eq!(
        table.import_shared(TOKEN + 1, 5),
        Err(ResourceError::DuplicateHandle { handle: 5 })
    );
}

#[test]
fn only_single_subresource_textures_are_shareable() {
    let mut table = ResourceTable::default();
    table.create(1, surface(3)).unwrap();
    assert!(matches!(
        table.export_shared(1, TOKEN),
        Err(ResourceError::NotShareable { handle: 1, .. })
    ));
    assert_eq!(table.export_shared(1, 0), Err(ResourceError::NullShareToken));
}

#[test]
fn release_retires_token_but_keeps_aliases() {
    let mut table = ResourceTable::default();
    table.create(1, surface(1)).unwrap();
    table.export_shared(1, TOKEN).unwrap();
    table.import_shared(TOKEN, 2).unwrap();

    assert!(table.release_shared(TOKEN));
    assert!(!table.release_shared(TOKEN));
    assert!(!table.release_shared(0xDEAD));

    assert!(table.texture2d(2).is_ok());
    assert_eq!(
        table.import_shared(TOKEN, 3),
        Err(ResourceError::UnknownToken { share_token: TOKEN })
    );
    assert_eq!(
        table.export_shared(1, TOKEN),
        Err(ResourceError::ShareTokenRetired { share_token: TOKEN })
    );
}

#[test]
fn shared_surface_across_processors() {
    let table = ResourceTable::new_shared(64);
    let mut producer = AeroGpuCommandProcessor::new(Arc::clone(&table), FramePacer::default());
    let mut consumer = AeroGpuCommandProcessor::new(Arc::clone(&table), FramePacer::default());
    let mut backend = RecordingAeroGpuBackend::new();

    let mut w = AerogpuCmdWriter::new();
    create_surface(&mut w, 100);
    w.export_shared_surface(100, TOKEN);
    producer.process(&w.finish(), 1, &mut backend).unwrap();

    let mut w = AerogpuCmdWriter::new();
    w.import_shared_surface(200, TOKEN);
    w.set_render_targets(&[200], 0);
    consumer.process(&w.finish(), 2, &mut backend).unwrap();
    assert_eq!(consumer.pipeline_state().render_targets[0], 200);

    let mut w = AerogpuCmdWriter::new();
    w.destroy_resource(100);
    producer.process(&w.finish(), 3, &mut backend).unwrap();
    assert!(!backend.commands.contains(&RecordedCommand::Destroy { id: 100 }));

    let mut w = AerogpuCmdWriter::new();
    w.destroy_resource(200);
    consumer.process(&w.finish(), 4, &mut backend).unwrap();
    // The host object is released once, under its underlying id.
    assert!(backend.commands.contains(&RecordedCommand::Destroy { id: 100 }));
    assert!(!consumer.pipeline_state().has_color_target());
    assert_eq!(table.lock().unwrap().live_handles(), 0);
}

#[test]
fn handles_freed_by_another_processor_are_not_drawn() {
    let table = ResourceTable::new_shared(64);
    let mut owner = AeroGpuCommandProcessor::new(Arc::clone(&table), FramePacer::default());
    let mut peer = AeroGpuCommandProcessor::new(Arc::clone(&table), FramePacer::default());
    let mut backend = RecordingAeroGpuBackend::new();

    let mut w = AerogpuCmdWriter::new();
    bind_draw_inputs(&mut w);
    create_surface(&mut w, 3);
    w.set_render_targets(&[3], 0);
    owner.process(&w.finish(), 1, &mut backend).unwrap();

    let mut w = AerogpuCmdWriter::new();
    w.destroy_resource(1);
    w.destroy_resource(3);
    peer.process(&w.finish(), 2, &mut backend).unwrap();
    // The owner's pipeline still names both handles.
    assert_eq!(owner.pipeline_state().render_targets[0], 3);

    let mut w = AerogpuCmdWriter::new();
    w.draw(3, 1, 0, 0);
    let err = owner.process(&w.finish(), 3, &mut backend).unwrap_err();
    assert_eq!(
        err.state_error(),
        Some(&StateError::MissingBinding(MissingBinding::VertexBuffer { slot: 0 }))
    );

    let mut w = AerogpuCmdWriter::new();
    w.clear(AEROGPU_CLEAR_COLOR, [0.0; 4], 1.0, 0);
    let err = owner.process(&w.finish(), 4, &mut backend).unwrap_err();
    assert_eq!(
        err.state_error(),
        Some(&StateError::MissingBinding(MissingBinding::RenderTarget))
    );

    assert!(!backend
        .commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::Draw(_) | RecordedCommand::Clear { .. })));
    assert!(backend.bindings.is_empty());
}

#[test]
fn imported_alias_reaches_backend_as_underlying_id() {
    let table = ResourceTable::new_shared(64);
    let mut producer = AeroGpuCommandProcessor::new(Arc::clone(&table), FramePacer::default());
    let mut consumer = AeroGpuCommandProcessor::new(Arc::clone(&table), FramePacer::default());
    let mut backend = RecordingAeroGpuBackend::new();

    let mut w = AerogpuCmdWriter::new();
    create_surface(&mut w, 100);
    w.export_shared_surface(100, TOKEN);
    producer.process(&w.finish(), 1, &mut backend).unwrap();

    let mut w = AerogpuCmdWriter::new();
    w.import_shared_surface(200, TOKEN);
    bind_draw_inputs(&mut w);
    w.set_render_targets(&[200], 0);
    w.clear(AEROGPU_CLEAR_COLOR, [0.0, 0.0, 0.0, 1.0], 1.0, 0);
    w.draw(3, 1, 0, 0);
    consumer.process(&w.finish(), 2, &mut backend).unwrap();

    // The pipeline keeps the guest's alias; the backend only sees host ids.
    assert_eq!(consumer.pipeline_state().render_targets[0], 200);
    assert_eq!(backend.bindings.len(), 2);
    for bindings in &backend.bindings {
        assert_eq!(bindings.render_targets[0], 100);
        assert_eq!(bindings.color_targets().collect::<Vec<_>>(), vec![100]);
    }
    let draw = backend.bindings.last().unwrap();
    assert_eq!(draw.vs, 4);
    assert_eq!(draw.input_layout, 6);
    assert_eq!(draw.vertex_buffers[0].map(|vb| vb.buffer), Some(1));
}

#[test]
fn unknown_token_import_fails_the_stream() {
    let mut processor = AeroGpuCommandProcessor::default();
    let mut w = AerogpuCmdWriter::new();
    w.import_shared_surface(7, TOKEN);
    let err = processor.process(&w.finish(), 1, &mut NullAeroGpuBackend::new()).unwrap_err();
    assert_eq!(
        err.resource_error(),
        Some(&ResourceError::UnknownToken { share_token: TOKEN })
    );
}

#[test]
fn racing_exports_resolve_to_one_owner() {
    let table = ResourceTable::new_shared(64);
    {
        let mut t = table.lock().unwrap();
        for handle in 1..=8 {
            t.create(handle, surface(1)).unwrap();
        }
    }

    let handles: Vec<_> = (1..=8u32)
        .map(|handle| {
            let table = Arc::clone(&table);
            thread::spawn(move || table.lock().unwrap().export_shared(handle, TOKEN))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let owner = table.lock().unwrap().lookup_share_token(TOKEN).unwrap();
    for result in results.into_iter().filter_map(Result::err) {
        match result {
            ResourceError::Collision { existing, .. } => assert_eq!(existing, owner),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
