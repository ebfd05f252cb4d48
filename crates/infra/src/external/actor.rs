use crate::services::RequestContext;

/// Identifies who is acting on behalf of a request.
pub trait ActorResolver: Send + Sync {
    /// The raw identity claim, or `None` when unauthenticated.
    fn resolve(&self, ctx: &RequestContext) -> Option<String>;
}

/// Reads the claim carried on the request context.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextActorResolver;

impl ActorResolver for ContextActorResolver {
    fn resolve(&self, ctx: &RequestContext) -> Option<String> {
        ctx.actor_claim()
            .map(str::trim)
            .filter(|claim| !claim.is_empty())
            .map(str::to_string)
    }
}
