use std::error::Error;

use studio_sync::status::AdaptivePoller;

fn main() -> Result<(), Box<dyn Error>> {
    let base_url = "http://localhost:8080";

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut poller = AdaptivePoller::new(base_url)?;
        let mut status_rx = poller.start();

        println!("initial status: {:?}", *status_rx.borrow());
        while status_rx.changed().await.is_ok() {
            println!("status: {:?}", *status_rx.borrow());
        }
        Ok(())
    })
}
