//! Requests the pager originates toward the kernel: the startup handshake,
//! eviction notices, prefetch hints, and unsolicited object-info pushes.

use pager_abi::{
    CopyCmd, EvictInfo, EvictStats, ObjID, ObjectInfo, ObjectRange, PagerCompletionData,
    PagerError, PagerRequest, PhysRange, RequestFromPager, Result,
};

use crate::PagerContext;

async fn submit(ctx: &PagerContext, req: PagerRequest) -> Result<PagerCompletionData> {
    let comp = ctx
        .kernel
        .submit_and_wait(RequestFromPager::new(req))
        .await
        .map_err(|_| PagerError::Protocol)?;
    Ok(comp.data())
}

/// Startup handshake. The completion carries the initial DRAM grant.
pub async fn report_ready(ctx: &PagerContext) -> Result<PhysRange> {
    match submit(ctx, PagerRequest::Ready).await? {
        PagerCompletionData::DramPages(range) => Ok(range),
        PagerCompletionData::Error(code) => Err(code.into()),
        _ => Err(PagerError::Protocol),
    }
}

/// Tell the kernel to unmap the given ranges and report their final flags.
pub async fn submit_evict(ctx: &PagerContext, info: EvictInfo) -> Result<EvictStats> {
    match submit(ctx, PagerRequest::Evict(info)).await? {
        PagerCompletionData::EvictSuccess(stats) => Ok(stats),
        PagerCompletionData::Error(code) => Err(code.into()),
        _ => Err(PagerError::Protocol),
    }
}

/// Offer the kernel already-fetched pages ahead of any fault.
pub async fn submit_prefetch(
    ctx: &PagerContext,
    id: ObjID,
    range: ObjectRange,
    phys: PhysRange,
) -> Result<()> {
    match submit(ctx, PagerRequest::Prefetch(id, range, phys)).await? {
        PagerCompletionData::Okay => Ok(()),
        PagerCompletionData::Error(code) => Err(code.into()),
        _ => Err(PagerError::Protocol),
    }
}

pub async fn push_object_info(ctx: &PagerContext, info: ObjectInfo) -> Result<()> {
    match submit(ctx, PagerRequest::ObjectInfo(info)).await? {
        PagerCompletionData::Okay => Ok(()),
        PagerCompletionData::Error(code) => Err(code.into()),
        _ => Err(PagerError::Protocol),
    }
}

/// Hand a copy command to the kernel, e.g. one the pager wants applied to
/// kernel-side mappings.
pub async fn submit_copy(ctx: &PagerContext, cmd: CopyCmd) -> Result<()> {
    match submit(ctx, PagerRequest::ObjectCopy(cmd)).await? {
        PagerCompletionData::Okay => Ok(()),
        PagerCompletionData::Error(code) => Err(code.into()),
        _ => Err(PagerError::Protocol),
    }
}
