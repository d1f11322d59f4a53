use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use slate_core::{Board, BoardId, Path, PathColor, Point};

fn populated_board(paths: u64) -> Board {
    let mut board = Board::new_owned(BoardId::parse("127.0.0.1:9000:bench").unwrap());
    for i in 0..paths {
        let points = (0..16).map(|j| Point::new(i as i32, j)).collect();
        let path = Path::new(PathColor::Black, points).encode();
        board.add_path(path, i);
    }
    board
}

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("Board serialization");
    for size in [10u64, 1_000] {
        let board = populated_board(size);
        group.throughput(Throughput::Elements(size));
        group.bench_function(format!("serialize_{size}_paths"), |b| {
            b.iter(|| black_box(board.serialize()))
        });
    }
    group.finish();
}

fn bench_apply_from_string(c: &mut Criterion) {
    let source = populated_board(1_000);
    let encoded = source.serialize();

    c.bench_function("apply_from_string_1000_paths", |b| {
        let mut replica = Board::new_view(source.id().clone());
        b.iter(|| replica.apply_from_string(black_box(&encoded)).unwrap())
    });
}

fn bench_cas_add_path(c: &mut Criterion) {
    let path = Path::new(PathColor::Red, vec![Point::new(1, 1), Point::new(2, 2)]).encode();

    c.bench_function("cas_add_path", |b| {
        let mut board = populated_board(0);
        b.iter(|| {
            let version = board.version();
            black_box(board.add_path(path.clone(), version));
        })
    });
}

criterion_group!(benches, bench_serialize, bench_apply_from_string, bench_cas_add_path);
criterion_main!(benches);
