use taskloom_common::TenantId;

tokio::task_local! {
    static CURRENT_TENANT: TenantId;
}

/// Reading the tenant outside an active scope. This is a dispatch-layer bug:
/// tools must only ever run inside `TenantContext::scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tenant context not set for this task")]
pub struct TenantContextUnset;

/// Request-scoped storage of the active tenant id.
///
/// The id is bound to the request future for exactly the duration of
/// `scope`; when the future finishes (normally or by cancellation) the value
/// is detached with it. There is no way to leave a tenant id behind for the
/// next request, so no cleanup discipline is required at call sites.
pub struct TenantContext;

impl TenantContext {
    /// Run `fut` with `tenant` as the active tenant id.
    pub async fn scope<F: Future>(tenant: TenantId, fut: F) -> F::Output {
        CURRENT_TENANT.scope(tenant, fut).await
    }

    /// The tenant id bound to the current task, or an error when called
    /// outside any scope.
    pub fn current() -> Result<TenantId, TenantContextUnset> {
        CURRENT_TENANT
            .try_with(|tenant| *tenant)
            .map_err(|_| TenantContextUnset)
    }
}
