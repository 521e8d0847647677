use lochness_core::Registry;
use lochness_events::Bus;
use lochness_kernel::Kernel;
use lochness_scheduler::Scheduler;

#[derive(Clone)]
pub(crate) struct AppState {
    scheduler: Scheduler,
    require_principal: bool,
    endpoints: std::sync::Arc<Vec<String>>,
}

impl AppState {
    pub fn new(scheduler: Scheduler, require_principal: bool) -> Self {
        Self {
            scheduler,
            require_principal,
            endpoints: std::sync::Arc::new(Vec::new()),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = std::sync::Arc::new(endpoints);
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn kernel(&self) -> &Kernel {
        self.scheduler.kernel()
    }

    pub fn registry(&self) -> &Registry {
        self.scheduler.registry()
    }

    pub fn bus(&self) -> &Bus {
        self.scheduler.bus()
    }

    pub fn require_principal(&self) -> bool {
        self.require_principal
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}
