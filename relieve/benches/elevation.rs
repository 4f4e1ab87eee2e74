use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relieve::{archive, ElevationPipelineBuilder, ElevationSampler, MemoryFetcher, RasterTile};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const SIDE: usize = 1201;
const SCALE: f64 = 1.0 / 1200.0;

/// Elevations with a gentle gradient and a spike every 97 samples.
fn samples() -> Vec<f32> {
    (0..SIDE * SIDE)
        .map(|i| {
            if i % 97 == 0 {
                9000.0
            } else {
                ((i / SIDE + i % SIDE) % 4000) as f32
            }
        })
        .collect()
}

/// A 1201×1201 GeoTIFF covering one degree with its top-left at (west, north).
fn create_geotiff(west: f64, north: f64) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf).unwrap();
        let mut image = encoder
            .new_image::<colortype::Gray32Float>(SIDE as u32, SIDE as u32)
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(33550), &[SCALE, SCALE, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(33922), &[0.0, 0.0, 0.0, west, north, 0.0][..])
            .unwrap();
        image.write_data(&samples()).unwrap();
    }
    buf.into_inner()
}

/// A container of `count` members, the last one named `target`.
fn create_container(count: usize, target: &str, payload: &[u8]) -> Vec<u8> {
    let filler = vec![7u8; 700_001];
    let mut builder = tar::Builder::new(Vec::new());
    for i in 0..count {
        let name = if i + 1 == count {
            target.to_string()
        } else {
            format!("filler_{}.tif", i)
        };
        let data: &[u8] = if i + 1 == count { payload } else { &filler };
        let mut header = tar::Header::new_ustar();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name.as_str(), data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn bench_extract_member(c: &mut Criterion) {
    let tiff = create_geotiff(-59.0, -34.0);
    let container = Bytes::from(create_container(8, "tile_1.tif", &tiff));

    c.bench_function("extract_last_of_8_members", |b| {
        b.iter(|| {
            black_box(archive::extract_member(&container, black_box("tile_1.tif")).unwrap());
        });
    });
}

fn bench_decode(c: &mut Criterion) {
    let tiff = create_geotiff(-59.0, -34.0);

    c.bench_function("decode_1201x1201_f32", |b| {
        b.iter(|| {
            black_box(RasterTile::decode(black_box(&tiff)).unwrap());
        });
    });
}

fn bench_sample(c: &mut Criterion) {
    let tile = RasterTile::decode(&create_geotiff(-59.0, -34.0)).unwrap();
    let sampler = ElevationSampler::default();

    // Generate 1000 coords within the tile
    let coords: Vec<(f64, f64)> = (0..1000)
        .map(|i| {
            let frac = i as f64 / 1000.0;
            (-34.0 - frac * 0.99, -59.0 + frac * 0.99)
        })
        .collect();

    c.bench_function("sample_1000_points", |b| {
        b.iter(|| {
            for (lat, lng) in &coords {
                black_box(sampler.sample(&tile, *lat, *lng));
            }
        });
    });
}

fn bench_pipeline_cached(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    let tiff = create_geotiff(-59.0, -34.0);
    let fetcher = MemoryFetcher::new()
        .with_file(
            "index.json",
            r#"{"tiles": {"tile_1": {"filename": "tile_1.tif", "archiveFile": "centro_01.tar",
                "bounds": {"north": -34, "south": -35, "east": -58, "west": -59}}}}"#,
        )
        .with_file("centro_01.tar", create_container(1, "tile_1.tif", &tiff));
    let pipeline = ElevationPipelineBuilder::new()
        .fetcher(Arc::new(fetcher))
        .build()
        .unwrap();

    // Warm the caches
    runtime.block_on(pipeline.elevation_at(-34.5, -58.5)).unwrap();

    c.bench_function("pipeline_point_cached", |b| {
        b.iter(|| {
            black_box(
                runtime
                    .block_on(pipeline.elevation_at(black_box(-34.6), black_box(-58.4)))
                    .unwrap(),
            );
        });
    });
}

criterion_group!(
    benches,
    bench_extract_member,
    bench_decode,
    bench_sample,
    bench_pipeline_cached,
);
criterion_main!(benches);
