use camera_session::capture::{ImageConverter, PixelFormat, RawImage};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn sensor_image(format: PixelFormat, width: u32, height: u32) -> RawImage {
    let bytes = format.bytes_per_pixel().unwrap_or(1);
    let data = (0..(width * height) as usize * bytes)
        .map(|i| (i * 31 % 251) as u8)
        .collect();
    RawImage::new(width, height, format, data)
}

fn bench_convert(c: &mut Criterion) {
    let converter = ImageConverter::new();
    let bayer = sensor_image(PixelFormat::BayerRG8, 1920, 1200);
    let mono = sensor_image(PixelFormat::Mono8, 1920, 1200);

    c.bench_function("bayer_rg8_1920x1200", |b| {
        b.iter(|| converter.convert(black_box(&bayer), 1).unwrap())
    });
    c.bench_function("mono8_1920x1200", |b| {
        b.iter(|| converter.convert(black_box(&mono), 1).unwrap())
    });
}

criterion_group!(benches, bench_convert);
criterion_main!(benches);
