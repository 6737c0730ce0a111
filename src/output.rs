// System
use std::io::{self, Write};

// Third Party
use k8s_openapi::api::core::v1::Service;
use tracing::debug;

// Local
use crate::informer::ServiceEvent;

/// Renders `<namespace>\t\t<name>\t\t<type>`. Unset fields render empty.
pub fn format_service_line(service: &Service) -> String {
    let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
    let name = service.metadata.name.as_deref().unwrap_or_default();
    let type_ = service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        .unwrap_or_default();
    format!("{}\t\t{}\t\t{}", namespace, name, type_)
}

/// Writes one line per service event, flushing after each so lines show up as they happen.
pub struct ServicePrinter<W: Write> {
    out: W,
}

impl ServicePrinter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ServicePrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Services that vanished across a relist are only logged, their final state is unknown.
    pub fn print(&mut self, event: &ServiceEvent) -> io::Result<()> {
        let service = event.service();
        if let ServiceEvent::Vanished(_) = event {
            debug!(
                "Service vanished during relist, not printing: {:?}/{:?}",
                service.metadata.namespace, service.metadata.name
            );
            return Ok(());
        }
        debug!(
            "Service {}: {:?}/{:?}",
            event.kind(),
            service.metadata.namespace,
            service.metadata.name
        );
        writeln!(self.out, "{}", format_service_line(service))?;
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
