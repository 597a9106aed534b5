//! Label, annotation, and tag names consumed by the shim.

/// Annotation domain owned by the scheduler.
pub const DOMAIN: &str = "gantry.io/";

/// Scheduler name expected in `pod.spec.scheduler_name` for managed pods.
pub const SCHEDULER_NAME: &str = "gantry";

/// Annotation carrying the owning application id.
pub const ANNOTATION_APP_ID: &str = "gantry.io/app-id";

/// Legacy label carrying the owning application id.
pub const LABEL_APP_ID: &str = "applicationId";

/// Label naming the target queue.
pub const LABEL_QUEUE: &str = "queue";

/// Queue used when a managed pod names none.
pub const DEFAULT_QUEUE: &str = "root.default";

/// User recorded when a managed pod names none.
pub const DEFAULT_USER: &str = "nobody";

// Namespace annotations read by the quota resolver.
pub const ANNOTATION_NAMESPACE_QUOTA: &str = "gantry.io/namespace.quota";
pub const ANNOTATION_NAMESPACE_GUARANTEED: &str = "gantry.io/namespace.guaranteed";
pub const ANNOTATION_NAMESPACE_MAX_PREFIX: &str = "gantry.io/namespace.max.";
pub const ANNOTATION_PARENT_QUEUE: &str = "gantry.io/parentqueue";

/// Priority-class annotation opting workloads out of preemption.
pub const ANNOTATION_ALLOW_PREEMPTION: &str = "gantry.io/allow-preemption";

// Application tags injected before registration with the scheduling core.
pub const APP_TAG_NAMESPACE: &str = "namespace";
pub const APP_TAG_NAMESPACE_RESOURCE_QUOTA: &str = "namespace.resourcequota";
pub const APP_TAG_NAMESPACE_RESOURCE_GUARANTEED: &str = "namespace.resourceguaranteed";
pub const APP_TAG_NAMESPACE_PARENT_QUEUE: &str = "namespace.parentqueue";
