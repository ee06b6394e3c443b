use sqpack_archive::packed::empty::pack_passthrough;
use sqpack_archive::packed::model::{pack_compressing as pack_model, RawModelSections, MODEL_HEADER_SIZE};
use sqpack_archive::packed::standard::pack_compressing as pack_standard;
use sqpack_archive::packed::texture::{pack_compressing as pack_texture, TextureHeader};
use sqpack_archive::path_spec::ArchiveId;
use sqpack_archive::{
    ArchiveGenerator, ArchiveReader, GeneratorOptions, HotSwapPackedStream, MemoryStream, PathSpec,
    Stream,
};
use std::sync::Arc;
use tempfile::TempDir;

fn entry(bytes: &[u8]) -> Arc<dyn Stream> {
    Arc::new(MemoryStream::new(bytes.to_vec()))
}

/// Fresh archive on disk, index/dat signatures intact, lookup by path.
#[test]
fn fresh_archive_round_trips_through_disk_and_lookup() {
    let id = ArchiveId::new(0x0a, 0, 0);
    let mut gen = ArchiveGenerator::new(id, GeneratorOptions::default());
    gen.add(PathSpec::parse("exd/root.exl"), entry(&pack_passthrough(b"root exl contents"))).unwrap();
    gen.add(PathSpec::parse("exd/item.exh"), entry(&pack_passthrough(b"item exh contents"))).unwrap();

    let dir = TempDir::new().unwrap();
    gen.export_to_files(dir.path()).unwrap();

    let prefix = format!("{:06x}", id.packed_id());
    let index1 = sqpack_archive::FileStream::open(dir.path().join(format!("{prefix}.win32.index"))).unwrap();
    let index2 = sqpack_archive::FileStream::open(dir.path().join(format!("{prefix}.win32.index2"))).unwrap();
    let dat0 = sqpack_archive::FileStream::open(dir.path().join(format!("{prefix}.win32.dat0"))).unwrap();

    let reader = ArchiveReader::open(id, &index1, &index2, vec![Arc::new(dat0)], true).unwrap();
    assert_eq!(reader.entries().len(), 2);

    let mut unpacker = reader.at(&PathSpec::parse("exd/root.exl")).unwrap();
    let mut out = vec![0u8; unpacker.decompressed_size() as usize];
    unpacker.read_exact_at(0, &mut out).unwrap();
    assert_eq!(out, b"root exl contents");
}

/// Three-entry archive: index1 and index2 must agree on every locator and
/// on the number of dat files produced.
#[test]
fn three_entry_archive_generates_agreeing_indices() {
    let id = ArchiveId::new(0x00, 0, 0);
    let mut gen = ArchiveGenerator::new(id, GeneratorOptions::default());
    for (name, payload) in [
        ("common/a.txt", b"alpha".to_vec()),
        ("common/b.txt", b"beta beta".to_vec()),
        ("common/c.txt", b"gamma gamma gamma".to_vec()),
    ] {
        gen.add(PathSpec::parse(name), entry(&pack_passthrough(&payload))).unwrap();
    }

    let generated = gen.finalize(None).unwrap();
    assert_eq!(generated.dat_files.len(), 1);

    let index1 = MemoryStream::new(generated.index1.clone());
    let index2 = MemoryStream::new(generated.index2.clone());
    let dat0: Arc<dyn Stream> = Arc::new(MemoryStream::new(generated.dat_files[0].clone()));
    let reader = ArchiveReader::open(id, &index1, &index2, vec![dat0], true).unwrap();
    assert_eq!(reader.entries().len(), 3);

    for name in ["common/a.txt", "common/b.txt", "common/c.txt"] {
        assert!(reader.packed_at(&PathSpec::parse(name)).is_ok());
    }
}

/// A full megabyte through the standard codec's block-compression path.
#[test]
fn one_megabyte_standard_entry_round_trips() {
    let data: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let packed_bytes = pack_standard(&data, 6).unwrap();
    assert_eq!(packed_bytes.len() % 128, 0);

    let stream: Arc<dyn Stream> = Arc::new(MemoryStream::new(packed_bytes));
    let packed = sqpack_archive::PackedStream::new(
        PathSpec::empty(ArchiveId::new(0, 0, 0)),
        stream,
        0,
        u64::MAX,
    );
    let header = packed.header().unwrap();
    assert_eq!(header.entry_type, sqpack_archive::PackedType::Standard);

    let mut unpacker = sqpack_archive::packed::unpack(&packed).unwrap();
    assert_eq!(unpacker.decompressed_size(), data.len() as u64);
    let mut out = vec![0u8; data.len()];
    unpacker.read_exact_at(0, &mut out).unwrap();
    assert_eq!(out, data);
}

/// Texture header fields and mipmap table survive packing intact.
#[test]
fn texture_header_fields_round_trip() {
    let header = TextureHeader {
        attribute: 0,
        format: 0x3420, // BC1
        width: 32,
        height: 32,
        depth: 1,
        mipmap_count: 1,
        array_size: 1,
        lod_offsets: [0, 0, 0],
    };
    let mip0 = vec![0xAAu8; 32 * 32 / 2];
    let packed_bytes = pack_texture(header, &[0], &[mip0.clone()], 6).unwrap();

    let stream: Arc<dyn Stream> = Arc::new(MemoryStream::new(packed_bytes));
    let packed = sqpack_archive::PackedStream::new(
        PathSpec::empty(ArchiveId::new(0, 0, 0)),
        stream,
        0,
        u64::MAX,
    );
    let entry_header = packed.header().unwrap();
    assert_eq!(entry_header.entry_type, sqpack_archive::PackedType::Texture);

    let mut unpacker = sqpack_archive::packed::unpack(&packed).unwrap();
    let mut head_out = vec![0u8; 28];
    unpacker.read_exact_at(0, &mut head_out).unwrap();
    let parsed = (
        u32::from_le_bytes(head_out[4..8].try_into().unwrap()), // format
        u16::from_le_bytes(head_out[8..10].try_into().unwrap()), // width
        u16::from_le_bytes(head_out[10..12].try_into().unwrap()), // height
        head_out[14], // mipmap_count
    );
    assert_eq!(parsed, (0x3420, 32, 32, 1));
}

/// Model round trip, checking the synthesized header's version, vertex
/// declaration count, material count, LOD count, and flags fields all
/// survive through the packed entry's locator prefix.
#[test]
fn model_round_trip_preserves_header_version() {
    let raw = RawModelSections {
        version: 16,
        vertex_declaration_count: 2,
        material_count: 3,
        lod_count: 3,
        flags: 0,
        stack: vec![1u8; 64],
        runtime: vec![2u8; 96],
        lods: [
            (vec![3u8; 400], vec![4u8; 20], vec![5u8; 200]),
            (vec![6u8; 200], vec![7u8; 10], vec![8u8; 100]),
            (vec![9u8; 100], vec![10u8; 5], vec![11u8; 50]),
        ],
    };
    let packed_bytes = pack_model(&raw, 6).unwrap();

    let stream: Arc<dyn Stream> = Arc::new(MemoryStream::new(packed_bytes));
    let packed = sqpack_archive::PackedStream::new(
        PathSpec::empty(ArchiveId::new(0, 0, 0)),
        stream,
        0,
        u64::MAX,
    );
    let entry_header = packed.header().unwrap();
    assert_eq!(entry_header.block_count_or_version, raw.version);

    let mut unpacker = sqpack_archive::packed::unpack(&packed).unwrap();
    let mut all = vec![0u8; unpacker.decompressed_size() as usize];
    unpacker.read_exact_at(0, &mut all).unwrap();
    assert!(all.len() >= MODEL_HEADER_SIZE);
    let version = u32::from_le_bytes(all[0..4].try_into().unwrap());
    assert_eq!(version, 16);
    let vertex_declaration_count = u16::from_le_bytes(all[12..14].try_into().unwrap());
    let material_count = u16::from_le_bytes(all[14..16].try_into().unwrap());
    assert_eq!(vertex_declaration_count, raw.vertex_declaration_count);
    assert_eq!(material_count, raw.material_count);
    assert_eq!(all[16], raw.lod_count);
    assert_eq!(all[17], raw.flags);
}

/// Hot-swap lifecycle: reserve a region, install a payload, confirm the
/// zero-filled tail, then revert back to the base stream.
#[test]
fn hotswap_reserve_install_zero_fill_and_revert() {
    let base: Arc<dyn Stream> = Arc::new(MemoryStream::new(pack_passthrough(b"base payload")));
    let swap = HotSwapPackedStream::new(256, Some(base));
    assert_eq!(swap.reserved_size(), 256);

    let replacement_bytes = pack_passthrough(b"hot");
    let replacement: Arc<dyn Stream> = Arc::new(MemoryStream::new(replacement_bytes.clone()));
    swap.swap(replacement).unwrap();

    let mut buf = vec![0xffu8; 256];
    swap.read_at(0, &mut buf).unwrap();
    assert_eq!(&buf[..replacement_bytes.len()], replacement_bytes.as_slice());
    assert!(buf[replacement_bytes.len()..].iter().all(|&b| b == 0));

    swap.revert();
    let base_bytes = pack_passthrough(b"base payload");
    let mut reverted = vec![0u8; base_bytes.len()];
    swap.read_at(0, &mut reverted).unwrap();
    assert_eq!(reverted, base_bytes);
}
