use tokio::sync::watch;

use crate::models::Route;

pub type RouteWatch = watch::Receiver<Route>;

/// Shared handle for moving the front-end between routes.
#[derive(Debug, Clone)]
pub struct Navigator {
    route: watch::Sender<Route>,
}

impl Navigator {
    pub fn new(initial: Route) -> (Self, RouteWatch) {
        let (route, watch) = watch::channel(initial);
        (Self { route }, watch)
    }

    /// Moves to `route`. Navigating to the current route does not notify watchers.
    pub fn navigate(&self, route: Route) {
        self.route.send_if_modified(|current| {
            if *current == route {
                return false;
            }
            log::info!("Navigating {current} -> {route}");
            *current = route;
            true
        });
    }

    pub fn current(&self) -> Route {
        self.route.borrow().clone()
    }
}
