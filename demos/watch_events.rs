use std::error::Error;

use studio_sync::push::PushEventListener;

fn main() -> Result<(), Box<dyn Error>> {
    let base_url = "http://localhost:8080";

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut listener = PushEventListener::new(base_url)?;
        let mut notices = listener.start();

        println!("listening for project events (ctrl-c to quit)");
        while let Some(notice) = notices.recv().await {
            println!("[push] {notice:?}, refetch project state");
        }
        Ok(())
    })
}
