//! Partner-discovery algorithms behind the sparse collectives
//!
//! Three ways to learn who sends to this rank without a global rendezvous:
//! scanning a one-sided window after a fence, counting incoming partners
//! with an all-reduce, and distributed termination detection built from
//! synchronous sends and a nonblocking barrier. Each moves `O(neighbors)`
//! payload data per rank and delivers the same multiset of
//! `(source, payload)` pairs.

use std::mem::size_of;
use std::thread;

use crate::collective::{BarrierRequest, CommunicatorCollectives};
use crate::datatype::{Buffer, BufferMut, Equivalence};
use crate::error::Error;
use crate::point_to_point::{Destination, Source};
use crate::{tags, Count, Rank};

use super::{ExtComm, RecvPlan, RecvPlanV, RecvShape, SendPlan, SendPlanV};

/// One-sided discovery: every sender puts its block at offset
/// `my_rank * slot` of the destination's window; after the closing fence,
/// each receiver scans its own window for occupied slots.
///
/// Without `marked`, occupancy is "any nonzero byte", which silently drops
/// legitimate all-zero payloads; with `marked`, a presence byte per slot
/// makes the scan exact.
pub(super) fn alltoall_crs_rma<S, R>(
    send: &SendPlan<'_, S>,
    recv: &mut RecvPlan<'_, R>,
    marked: bool,
    xcomm: &mut ExtComm,
) -> Result<usize, Error>
where
    S: Equivalence,
    R: Equivalence,
{
    let (rank, num_procs) = {
        let comm = xcomm.communicator();
        (comm.rank(), comm.size() as usize)
    };

    let send_bytes = send.count as usize * size_of::<S>();
    let recv_bytes = recv.count as usize * size_of::<R>();
    let slot_bytes = recv_bytes + usize::from(marked);
    let bytes = num_procs * slot_bytes;

    let window = xcomm.ensure_window(bytes, 1);
    window.local_region().fill(0);

    // Epoch open: no local reads until the closing fence.
    window.fence();
    let send_buffer = send.vals.as_bytes();
    for (i, &dest) in send.dest.iter().enumerate() {
        let block = &send_buffer[i * send_bytes..(i + 1) * send_bytes];
        let disp = rank as usize * slot_bytes;
        if marked {
            window.put(&[1], dest, disp)?;
            window.put(block, dest, disp + 1)?;
        } else {
            window.put(block, dest, disp)?;
        }
    }
    // Epoch close: all remote puts are now locally visible.
    window.fence();

    let mut ctr = 0;
    let region = window.local_region();
    let recv_buffer = recv.vals.as_bytes_mut();
    for proc in 0..num_procs {
        let slot = &region[proc * slot_bytes..(proc + 1) * slot_bytes];
        let (present, payload) = if marked {
            (slot[0] != 0, &slot[1..])
        } else {
            (slot.iter().any(|&byte| byte != 0), slot)
        };
        if present {
            recv.src[ctr] = proc as Rank;
            recv_buffer[ctr * recv_bytes..(ctr + 1) * recv_bytes].copy_from_slice(payload);
            ctr += 1;
        }
    }
    Ok(ctr)
}

/// Two-sided discovery by counting: an all-reduce over per-destination
/// marker vectors tells each rank how many partners target it; that many
/// probe-and-receive rounds then drain the reserved tag.
pub(super) fn alltoall_crs_personalized<S, R>(
    send: &SendPlan<'_, S>,
    recv: &mut RecvPlan<'_, R>,
    n_recv: Option<usize>,
    xcomm: &mut ExtComm,
) -> Result<usize, Error>
where
    S: Equivalence,
    R: Equivalence,
{
    let send_nnz = send.dest.len();
    let send_bytes = send.count as usize * size_of::<S>();
    let recv_bytes = recv.count as usize * size_of::<R>();

    let n_recv = match n_recv {
        Some(known) => known,
        None => {
            let comm = xcomm.communicator();
            let mut msg_counts = vec![0 as Count; comm.size() as usize];
            for &dest in send.dest {
                msg_counts[dest as usize] = 1;
            }
            comm.all_reduce_sum_into(&mut msg_counts)?;
            msg_counts[comm.rank() as usize] as usize
        }
    };

    let (comm, requests) = xcomm.parts();
    requests.ensure(send_nnz);
    let send_buffer = send.vals.as_bytes();
    for (i, &dest) in send.dest.iter().enumerate() {
        let request = comm.process_at_rank(dest).immediate_send_with_tag(
            &send_buffer[i * send_bytes..(i + 1) * send_bytes],
            tags::ALLTOALL_PERSONALIZED,
        );
        requests.set(i, request);
    }

    let recv_buffer = recv.vals.as_bytes_mut();
    for ctr in 0..n_recv {
        let status = comm
            .any_process()
            .probe_with_tag(tags::ALLTOALL_PERSONALIZED);
        let source = status.source_rank();
        recv.src[ctr] = source;
        comm.process_at_rank(source).receive_into_with_tag(
            &mut recv_buffer[ctr * recv_bytes..(ctr + 1) * recv_bytes],
            tags::ALLTOALL_PERSONALIZED,
        )?;
    }

    requests.wait_all(send_nnz);
    Ok(n_recv)
}

/// Two-sided discovery without a reduction: synchronous sends complete only
/// once matched, so a rank may enter the nonblocking barrier as soon as its
/// sends are all matched; barrier completion then proves that every pending
/// arrival has already been drained.
///
/// The probe and the barrier test are interleaved every iteration so that a
/// long send tail cannot starve barrier progress and vice versa.
pub(super) fn alltoall_crs_nonblocking<S, R>(
    send: &SendPlan<'_, S>,
    recv: &mut RecvPlan<'_, R>,
    xcomm: &mut ExtComm,
) -> Result<usize, Error>
where
    S: Equivalence,
    R: Equivalence,
{
    let send_nnz = send.dest.len();
    let send_bytes = send.count as usize * size_of::<S>();
    let recv_bytes = recv.count as usize * size_of::<R>();

    let (comm, requests) = xcomm.parts();
    requests.ensure(send_nnz);
    let send_buffer = send.vals.as_bytes();
    for (i, &dest) in send.dest.iter().enumerate() {
        let request = comm.process_at_rank(dest).immediate_synchronous_send_with_tag(
            &send_buffer[i * send_bytes..(i + 1) * send_bytes],
            tags::ALLTOALL_NONBLOCKING,
        );
        requests.set(i, request);
    }

    let recv_buffer = recv.vals.as_bytes_mut();
    let mut ctr = 0;
    let mut barrier: Option<BarrierRequest> = None;
    loop {
        if let Some(status) = comm
            .any_process()
            .immediate_probe_with_tag(tags::ALLTOALL_NONBLOCKING)
        {
            let source = status.source_rank();
            recv.src[ctr] = source;
            comm.process_at_rank(source).receive_into_with_tag(
                &mut recv_buffer[ctr * recv_bytes..(ctr + 1) * recv_bytes],
                tags::ALLTOALL_NONBLOCKING,
            )?;
            ctr += 1;
        }
        match &barrier {
            Some(request) => {
                if request.test() {
                    break;
                }
            }
            None => {
                if requests.test_all(send_nnz) {
                    barrier = Some(comm.immediate_barrier());
                }
            }
        }
        thread::yield_now();
    }

    requests.wait_all(send_nnz);
    Ok(ctr)
}

/// Variable-size rendition of the personalized algorithm: the reduction
/// carries byte counts instead of partner markers, and each probed message
/// reports its own length through get-count.
pub(super) fn alltoallv_crs_personalized<S, R>(
    send: &SendPlanV<'_, S>,
    recv: &mut RecvPlanV<'_, R>,
    recv_size: Option<usize>,
    xcomm: &mut ExtComm,
) -> Result<RecvShape, Error>
where
    S: Equivalence,
    R: Equivalence,
{
    let send_nnz = send.dest.len();
    let send_elt = size_of::<S>();
    let recv_elt = size_of::<R>();

    let recv_size = match recv_size {
        Some(known) => known,
        None => {
            let comm = xcomm.communicator();
            let mut msg_counts = vec![0 as Count; comm.size() as usize];
            for (i, &dest) in send.dest.iter().enumerate() {
                msg_counts[dest as usize] += send.counts[i] * send_elt as Count;
            }
            comm.all_reduce_sum_into(&mut msg_counts)?;
            msg_counts[comm.rank() as usize] as usize / recv_elt
        }
    };

    let (comm, requests) = xcomm.parts();
    requests.ensure(send_nnz);
    let send_buffer = send.vals.as_bytes();
    for i in 0..send_nnz {
        let start = send.displs[i] as usize * send_elt;
        let len = send.counts[i] as usize * send_elt;
        let request = comm.process_at_rank(send.dest[i]).immediate_send_with_tag(
            &send_buffer[start..start + len],
            tags::ALLTOALL_PERSONALIZED,
        );
        requests.set(i, request);
    }

    let recv_buffer = recv.vals.as_bytes_mut();
    let total_bytes = recv_size * recv_elt;
    let mut received = 0;
    let mut idx = 0;
    recv.displs[0] = 0;
    while received < total_bytes {
        let status = comm
            .any_process()
            .probe_with_tag(tags::ALLTOALL_PERSONALIZED);
        let source = status.source_rank();
        let count = status.count(R::equivalent_datatype());
        recv.src[idx] = source;
        recv.counts[idx] = count;
        recv.displs[idx + 1] = recv.displs[idx] + count;
        let len = count as usize * recv_elt;
        comm.process_at_rank(source).receive_into_with_tag(
            &mut recv_buffer[received..received + len],
            tags::ALLTOALL_PERSONALIZED,
        )?;
        received += len;
        idx += 1;
    }

    requests.wait_all(send_nnz);
    Ok(RecvShape {
        n_recv: idx,
        recv_size,
    })
}
