use criterion::{black_box, criterion_group, criterion_main, Criterion};
use slate_collab::broadcast::SubscriberSet;
use slate_collab::protocol::Message;
use slate_collab::transport::SessionHandle;
use slate_core::{Board, BoardId, EncodedPath, Mutation};

fn board_with_paths(n: usize) -> Board {
    let id = BoardId::parse("127.0.0.1:9000:board1").unwrap();
    let mut board = Board::new_owned(id);
    for i in 0..n {
        let path = EncodedPath::new(format!("black;{i},0;{i},10;{i},20")).unwrap();
        board.add_path(path, i as u64);
    }
    board
}

fn bench_accepted_encode(c: &mut Criterion) {
    let board = board_with_paths(100);
    let msg = Message::Accepted {
        kind: slate_core::MutationKind::Path,
        snapshot: board.snapshot(),
    };

    c.bench_function("accepted_encode_100_paths", |b| {
        b.iter(|| black_box(msg.encode().unwrap()))
    });
}

fn bench_accepted_decode(c: &mut Criterion) {
    let board = board_with_paths(100);
    let encoded = Message::BoardData(board.snapshot()).encode().unwrap();

    c.bench_function("board_data_decode_100_paths", |b| {
        b.iter(|| black_box(Message::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_proposal_decode(c: &mut Criterion) {
    let board = board_with_paths(10);
    let proposal = board.proposal(Mutation::AddPath(EncodedPath::new("red;1,1;2,2").unwrap()));
    let encoded = Message::Update(proposal).encode().unwrap();

    c.bench_function("path_update_decode", |b| {
        b.iter(|| black_box(Message::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_fan_out(c: &mut Criterion) {
    let mut set = SubscriberSet::new();
    let mut receivers = Vec::new();
    for i in 0..100 {
        let (session, rx) = SessionHandle::detached(format!("peer{i}"), 1024);
        set.add(session);
        receivers.push(rx);
    }
    let msg = Message::Accepted {
        kind: slate_core::MutationKind::Path,
        snapshot: board_with_paths(10).snapshot(),
    };

    c.bench_function("fan_out_100_subscribers", |b| {
        b.iter(|| {
            black_box(set.broadcast(&msg));
            for rx in &mut receivers {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

criterion_group!(
    benches,
    bench_accepted_encode,
    bench_accepted_decode,
    bench_proposal_decode,
    bench_fan_out,
);
criterion_main!(benches);
