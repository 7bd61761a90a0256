//! Variable-size sparse all-to-all scenarios.

use sparse_coll::environment::{self, Config};
use sparse_coll::neighborhood::{alltoallv_crs, ExtComm, RecvPlanV, SendPlanV};
use sparse_coll::traits::CommunicatorCollectives;
use sparse_coll::{Count, Rank};

/// Per-rank outcome of one variable-size exchange.
#[derive(Debug, PartialEq)]
struct Outcome {
    src: Vec<Rank>,
    counts: Vec<Count>,
    vals: Vec<i32>,
    recv_size: usize,
}

/// Runs one exchange on a fresh group. `plan` yields `(dest, counts, vals)`
/// per rank; displacements are the prefix sums of `counts`. Checks the
/// displacement bookkeeping before returning.
fn exchange(
    size: usize,
    max_recv_elems: usize,
    plan: fn(Rank, Rank) -> (Vec<Rank>, Vec<Count>, Vec<i32>),
) -> Vec<Outcome> {
    environment::run(Config::new(size), move |world| {
        let rank = world.rank();
        let world_size = world.size();
        let mut xcomm = ExtComm::new(world);

        let (dest, counts, vals) = plan(rank, world_size);
        let displs: Vec<Count> = counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();

        let mut src = vec![0 as Rank; size];
        let mut recv_counts = vec![0 as Count; size];
        let mut recv_displs = vec![0 as Count; size + 1];
        let mut recv_vals = vec![0i32; max_recv_elems];

        let send = SendPlanV::new(&dest, &counts, &displs, &vals);
        let mut recv = RecvPlanV::new(&mut src, &mut recv_counts, &mut recv_displs, &mut recv_vals);
        let shape = alltoallv_crs(&send, &mut recv, None, &mut xcomm).unwrap();

        // Displacement bookkeeping must tally with the discovered total.
        assert_eq!(recv_displs[shape.n_recv] as usize, shape.recv_size);
        let counted: Count = recv_counts[..shape.n_recv].iter().sum();
        assert_eq!(counted as usize, shape.recv_size);
        for i in 0..shape.n_recv {
            assert_eq!(recv_displs[i + 1], recv_displs[i] + recv_counts[i]);
        }

        Outcome {
            src: src[..shape.n_recv].to_vec(),
            counts: recv_counts[..shape.n_recv].to_vec(),
            vals: recv_vals[..shape.recv_size].to_vec(),
            recv_size: shape.recv_size,
        }
    })
}

/// `(source, payload)` pairs in source order, for multiset comparison.
fn pairs(outcome: &Outcome) -> Vec<(Rank, Vec<i32>)> {
    let mut offset = 0;
    let mut out: Vec<_> = outcome
        .src
        .iter()
        .zip(&outcome.counts)
        .map(|(&s, &c)| {
            let chunk = outcome.vals[offset..offset + c as usize].to_vec();
            offset += c as usize;
            (s, chunk)
        })
        .collect();
    out.sort();
    out
}

#[test]
fn mixed_sizes_across_three_ranks() {
    let results = exchange(3, 16, |rank, _| match rank {
        0 => (vec![1, 2], vec![3, 1], vec![1, 2, 3, 9]),
        1 => (vec![0], vec![2], vec![5, 5]),
        _ => (vec![], vec![], vec![]),
    });

    assert_eq!(results[0].src, vec![1]);
    assert_eq!(results[0].counts, vec![2]);
    assert_eq!(results[0].vals, vec![5, 5]);
    assert_eq!(results[0].recv_size, 2);

    assert_eq!(results[1].src, vec![0]);
    assert_eq!(results[1].counts, vec![3]);
    assert_eq!(results[1].vals, vec![1, 2, 3]);

    assert_eq!(results[2].src, vec![0]);
    assert_eq!(results[2].counts, vec![1]);
    assert_eq!(results[2].vals, vec![9]);
}

#[test]
fn empty_collective() {
    let results = exchange(3, 4, |_, _| (vec![], vec![], vec![]));
    for outcome in results {
        assert_eq!(outcome.src, Vec::<Rank>::new());
        assert_eq!(outcome.recv_size, 0);
    }
}

#[test]
fn self_send() {
    let results = exchange(2, 4, |rank, _| {
        (vec![rank], vec![2], vec![rank * 10 + 1, rank * 10 + 2])
    });
    for (rank, outcome) in results.into_iter().enumerate() {
        let rank = rank as Rank;
        assert_eq!(outcome.src, vec![rank]);
        assert_eq!(outcome.vals, vec![rank * 10 + 1, rank * 10 + 2]);
    }
}

/// Message length from `sender` to `receiver` in the pattern below; zero
/// means no message.
fn pattern_len(sender: Rank, receiver: Rank) -> Count {
    if sender == receiver || (sender + 2 * receiver) % 3 == 0 {
        (sender + receiver) % 3 + 1
    } else {
        0
    }
}

fn pattern_payload(sender: Rank, receiver: Rank) -> Vec<i32> {
    (0..pattern_len(sender, receiver))
        .map(|i| sender * 1000 + receiver * 10 + i)
        .collect()
}

fn pattern_plan(rank: Rank, size: Rank) -> (Vec<Rank>, Vec<Count>, Vec<i32>) {
    let dest: Vec<Rank> = (0..size).filter(|&d| pattern_len(rank, d) > 0).collect();
    let counts: Vec<Count> = dest.iter().map(|&d| pattern_len(rank, d)).collect();
    let vals: Vec<i32> = dest.iter().flat_map(|&d| pattern_payload(rank, d)).collect();
    (dest, counts, vals)
}

#[test]
fn pattern_delivers_exact_multiset() {
    let size = 5;
    let results = exchange(size, 64, pattern_plan);
    for (rank, outcome) in results.iter().enumerate() {
        let rank = rank as Rank;
        let expected: Vec<(Rank, Vec<i32>)> = (0..size as Rank)
            .filter(|&s| pattern_len(s, rank) > 0)
            .map(|s| (s, pattern_payload(s, rank)))
            .collect();
        assert_eq!(pairs(outcome), expected);
    }
}

#[test]
fn symmetry_of_send_and_receive_totals() {
    let size = 5;
    let results = exchange(size, 64, pattern_plan);
    let total_sent: usize = (0..size as Rank)
        .map(|r| pattern_plan(r, size as Rank).0.len())
        .sum();
    let total_received: usize = results.iter().map(|o| o.src.len()).sum();
    assert_eq!(total_sent, total_received);
}

#[test]
fn known_total_matches_computed() {
    let per_rank = environment::run(Config::new(4), |world| {
        let rank = world.rank();
        let size = world.size();
        let mut xcomm = ExtComm::new(world);
        let (dest, counts, vals) = pattern_plan(rank, size);
        let displs: Vec<Count> = counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();

        let run_once = |xcomm: &mut ExtComm, known: Option<usize>| {
            let mut src = vec![0 as Rank; 4];
            let mut recv_counts = vec![0 as Count; 4];
            let mut recv_displs = vec![0 as Count; 5];
            let mut recv_vals = vec![0i32; 64];
            let send = SendPlanV::new(&dest, &counts, &displs, &vals);
            let mut recv =
                RecvPlanV::new(&mut src, &mut recv_counts, &mut recv_displs, &mut recv_vals);
            let shape = alltoallv_crs(&send, &mut recv, known, xcomm).unwrap();
            let mut observed: Vec<(Rank, Count)> = src[..shape.n_recv]
                .iter()
                .copied()
                .zip(recv_counts[..shape.n_recv].iter().copied())
                .collect();
            observed.sort();
            (shape.recv_size, observed)
        };

        let (computed_total, computed) = run_once(&mut xcomm, None);
        // Quiesce before reusing the exchange tag, so a fast rank's second
        // round cannot be drained by a slow rank's first.
        xcomm.communicator().barrier();
        let (known_total, known) = run_once(&mut xcomm, Some(computed_total));
        assert_eq!(computed_total, known_total);
        (computed, known)
    });

    for (computed, known) in per_rank {
        assert_eq!(computed, known);
    }
}
