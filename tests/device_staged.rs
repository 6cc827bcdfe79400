#![cfg(feature = "wgpu")]
//! Staged device exchange against the host reference, bit for bit.

use std::sync::Arc;

use grid_halo::prelude::*;

fn try_gpu() -> Option<WgpuGpu> {
    let instance = wgpu::Instance::default();
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::LowPower,
        force_fallback_adapter: false,
        compatible_surface: None,
    }))?;
    let (device, queue) = pollster::block_on(
        adapter.request_device(&wgpu::DeviceDescriptor::default(), None),
    )
    .ok()?;
    Some(WgpuGpu {
        device: Arc::new(device),
        queue: Arc::new(queue),
    })
}

#[test]
fn staged_device_exchange_matches_host_reference() {
    let Some(gpu) = try_gpu() else {
        eprintln!("no wgpu adapter available, skipping");
        return;
    };

    let size = [8usize, 6, 1];
    let shape = [8usize, 6];
    let start: Vec<f32> = (0..48).map(|l| (l as f32) * 0.5 + 1.0).collect();

    // Host reference.
    let mut host = start.clone();
    {
        let topo = CartesianTopology::single([true, true, false], size, [2, 2, 0]);
        let mut ex = HaloExchanger::new(topo, NoComm);
        let mut fields = [AnyField::from(Field::from_host(&mut host, &shape).unwrap())];
        ex.update_halo(&mut fields).unwrap();
    }

    // Same exchange with the field on the device.
    let topo = CartesianTopology::single([true, true, false], size, [2, 2, 0]);
    let mut ex = HaloExchanger::new(topo, NoComm);
    let mut dev = WgpuField::from_host(&gpu, &start, &shape).unwrap();
    let mut fields = [AnyField::from(Field::from_wgpu(&mut dev).unwrap())];
    ex.update_halo(&mut fields).unwrap();
    drop(fields);

    let got = dev.to_host().unwrap();
    assert_eq!(
        got.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
        host.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
    );
}
