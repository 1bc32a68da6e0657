use safework_core::ActorId;
use safework_infra::surveys::RequestMeta;

/// Caller identity for a request.
///
/// Set by the upstream auth collaborator through `x-authenticated-user`;
/// anonymous when the header is absent or blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor: ActorId,
}

impl ActorContext {
    pub fn new(actor: ActorId) -> Self {
        Self { actor }
    }

    pub fn anonymous() -> Self {
        Self::new(ActorId::anonymous())
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn is_anonymous(&self) -> bool {
        self.actor.is_anonymous()
    }
}

/// Request metadata recorded with audit entries.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    meta: RequestMeta,
}

impl RequestContext {
    pub fn new(meta: RequestMeta) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }
}
