//! Dispatch for kernel-originated requests. Every request gets a completion,
//! protocol errors included; nothing on this path is allowed to take the
//! service down.

use pager_abi::{
    CompletionToKernel, ItemList, KernelCommand, KernelCompletionData, KernelCompletionFlags,
    PagerError, PhysRange, RequestFromKernel, NR_RANGES,
};

use crate::{data, PagerContext};

fn done(data: KernelCompletionData) -> CompletionToKernel {
    CompletionToKernel::new(data, KernelCompletionFlags::DONE)
}

fn err(e: PagerError) -> CompletionToKernel {
    done(KernelCompletionData::Error(e.into()))
}

pub async fn handle_kernel_request(
    ctx: &'static PagerContext,
    id: u32,
    request: RequestFromKernel,
) -> CompletionToKernel {
    tracing::debug!("handling kernel request {}: {:?}", id, request.cmd());
    match request.cmd() {
        KernelCommand::ObjectInfoReq(obj_id) => match data::lookup_object(ctx, obj_id).await {
            Ok(info) => done(KernelCompletionData::ObjectInfo(info)),
            Err(e) => err(e),
        },

        KernelCommand::PageDataReq(obj_id, ranges) => {
            if ranges.is_empty() {
                return err(PagerError::Protocol);
            }
            let mut out: ItemList<PhysRange, NR_RANGES> = ItemList::new();
            let mut first_err = None;
            'ranges: for range in ranges.iter() {
                if !range.is_page_aligned() {
                    first_err.get_or_insert(PagerError::InvalidRange);
                    break;
                }
                match data::fetch(ctx, obj_id, *range).await {
                    Ok(runs) => {
                        for run in runs {
                            if out.push(run).is_err() {
                                // Out of batch space; what we have is a legal
                                // partial answer.
                                break 'ranges;
                            }
                        }
                    }
                    Err(e) => {
                        first_err.get_or_insert(e);
                        break;
                    }
                }
            }
            if out.is_empty() {
                err(first_err.unwrap_or(PagerError::Protocol))
            } else {
                done(KernelCompletionData::PageInfo(out))
            }
        }

        KernelCommand::DramPages(ranges) => {
            if ranges.is_empty() {
                return err(PagerError::Protocol);
            }
            for range in ranges.iter() {
                if let Err(e) = range.validate() {
                    return err(e);
                }
            }
            for range in ranges.iter() {
                if let Err(e) = ctx.arena.grant(range).and_then(|_| ctx.ledger.grant(range)) {
                    return err(e);
                }
                tracing::info!(
                    "granted {} pages at {:x}",
                    range.nr_pages,
                    range.start
                );
            }
            done(KernelCompletionData::Okay)
        }

        KernelCommand::ObjectCopy(cmd) => match data::apply_copy(ctx, &cmd).await {
            Ok(()) => done(KernelCompletionData::Okay),
            Err(e) => err(e),
        },

        KernelCommand::ObjectCreate(info) => match data::register_object(ctx, info).await {
            Ok(()) => done(KernelCompletionData::ObjectInfo(info)),
            Err(e) => err(e),
        },

        KernelCommand::ObjectDel(obj_id) => match data::drop_object(ctx, obj_id).await {
            Ok(()) => done(KernelCompletionData::Okay),
            Err(e) => err(e),
        },
    }
}
