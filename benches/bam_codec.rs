//! Benchmarks for the record codec, BGZF compression and index building
//!
//! Run with: cargo bench --bench bam_codec

use bamforge::io::bam::{
    decode_record, encode_record, AlignmentRecord, BamWriter, CigarOp, Header, Reference, Session, SortMode,
    Tag, TagValue, WriterOptions,
};
use bamforge::io::compression::{compress, decompress};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;

fn header() -> Header {
    Header::new("@HD\tVN:1.6\n", vec![Reference::new("chr1", 248_956_422)])
}

/// Generate a mapped 150bp record
fn generate_record(i: u32) -> AlignmentRecord {
    let mut record = AlignmentRecord::new(format!("read{i}"));
    record.flags = 0;
    record.reference_name = Some("chr1".to_string());
    record.position = 1 + (i * 7_919) % 200_000_000;
    record.mapq = 60;
    record.cigar = vec![CigarOp::SoftClip(5), CigarOp::Match(140), CigarOp::SoftClip(5)];
    record.sequence = (0..150).map(|j| [b'A', b'C', b'G', b'T'][(i as usize + j) % 4]).collect();
    record.quality = Some((0..150).map(|j| (j % 40) as u8).collect());
    record.tags = vec![
        Tag::new(*b"NM", TagValue::Int(2)),
        Tag::new(*b"RG", TagValue::String("group1".to_string())),
    ];
    record
}

fn bench_record_codec(c: &mut Criterion) {
    let header = header();
    let session = Session::new(&header);
    let record = generate_record(42);
    let mut encoded = Vec::new();
    encode_record(&record, &session, &mut encoded).unwrap();

    let mut group = c.benchmark_group("record_codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode", |b| {
        let mut buf = Vec::with_capacity(encoded.len());
        b.iter(|| {
            buf.clear();
            encode_record(black_box(&record), &session, &mut buf).unwrap();
        })
    });
    group.bench_function("decode", |b| {
        b.iter(|| decode_record(black_box(&encoded), &session).unwrap())
    });
    group.finish();
}

fn bench_bgzf(c: &mut Criterion) {
    let mut group = c.benchmark_group("bgzf");

    for size in [64 * 1024, 1024 * 1024].iter() {
        let data: Vec<u8> = (0..*size).map(|i| b"ACGTNACGTT"[i % 10]).collect();
        let mut compressed = Vec::new();
        compress(Cursor::new(&data), &mut compressed).unwrap();

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("compress", size), size, |b, _| {
            b.iter(|| {
                let mut out = Vec::with_capacity(compressed.len());
                compress(Cursor::new(black_box(&data)), &mut out).unwrap();
                out
            })
        });
        group.bench_with_input(BenchmarkId::new("decompress", size), size, |b, _| {
            b.iter(|| {
                let mut out = Vec::with_capacity(*size);
                decompress(Cursor::new(black_box(&compressed)), &mut out).unwrap();
                out
            })
        });
    }

    group.finish();
}

fn bench_write_indexed(c: &mut Criterion) {
    let records: Vec<AlignmentRecord> = (0..10_000).map(generate_record).collect();
    let mut group = c.benchmark_group("write_indexed");
    group.sample_size(20);
    group.throughput(Throughput::Elements(records.len() as u64));

    group.bench_function("coordinate_sorted", |b| {
        b.iter(|| {
            let options = WriterOptions::default()
                .with_sort_mode(SortMode::Coordinate)
                .with_spill_threshold(2_500);
            let mut writer = BamWriter::new(Vec::new(), header(), options).unwrap();
            writer.write_sorted(black_box(&records)).unwrap();
            writer.finish().unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_record_codec, bench_bgzf, bench_write_indexed);
criterion_main!(benches);
