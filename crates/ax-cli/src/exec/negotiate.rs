//! Exec session negotiation

use ax_core::api::ExecSpec;
use ax_core::{AllocationStub, ExecRequest, SessionError};
use ax_protocol::PROTOCOL_VERSION;

use crate::api::{ApiClient, ExecTransport};

/// Pick the task to exec into.
///
/// An explicit task is passed through for the control plane to check;
/// otherwise the allocation must run exactly one task.
pub fn select_task(alloc: &AllocationStub, task: Option<&str>) -> Result<String, SessionError> {
    if let Some(task) = task {
        return Ok(task.to_string());
    }
    match alloc.tasks.as_slice() {
        [] => Err(SessionError::NoTasks(alloc.id.clone())),
        [only] => Ok(only.clone()),
        tasks => Err(SessionError::TaskRequired {
            alloc_id: alloc.id.clone(),
            tasks: tasks.to_vec(),
        }),
    }
}

/// Refuse allocations that can never accept an exec session
pub fn check_runnable(alloc: &AllocationStub) -> Result<(), SessionError> {
    if alloc.client_status.is_terminal() {
        return Err(SessionError::AllocationNotRunning {
            alloc_id: alloc.id.clone(),
            status: alloc.client_status.to_string(),
        });
    }
    Ok(())
}

/// Build the handshake for `request` against a resolved allocation
pub fn exec_spec(alloc: &AllocationStub, request: &ExecRequest) -> Result<ExecSpec, SessionError> {
    request.validate()?;
    check_runnable(alloc)?;
    let task = select_task(alloc, request.task.as_deref())?;

    Ok(ExecSpec {
        alloc_id: alloc.id.clone(),
        task,
        command: request.command.clone(),
        tty: request.tty,
        size: request.size,
        version: PROTOCOL_VERSION.to_string(),
    })
}

/// Open an independent exec session; never retried
pub async fn open_session(
    client: &ApiClient,
    alloc: &AllocationStub,
    request: &ExecRequest,
) -> Result<ExecTransport, SessionError> {
    let spec = exec_spec(alloc, request)?;
    tracing::info!(
        alloc = %alloc.short_id(),
        task = %spec.task,
        tty = spec.tty,
        "Opening exec session"
    );
    client.open_exec(&spec).await
}
