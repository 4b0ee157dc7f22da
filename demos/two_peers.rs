use tracing::Level;

use rudp_peer::peer::config::PeerConfig;
use rudp_peer::peer::peer::Peer;


fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    init_logging();

    let alice = Peer::new("Alice", PeerConfig::new("127.0.0.1:6666".parse()?, 2)).await?;
    let bob = Peer::new("Bob", PeerConfig::new("127.0.0.1:5555".parse()?, 2)).await?;

    alice.reliable_send("Alice: Hi Bob.", "127.0.0.1:5555").await?;
    alice.reliable_send("Alice: Are you ok?", "127.0.0.1:5555").await?;
    // this one waits for one of the previous two to be acked before going out
    alice.reliable_send("Alice: Are you ok2?", "127.0.0.1:5555").await?;
    bob.reliable_send("Bob: Hello Alice.", "127.0.0.1:6666").await?;

    alice.wait().await;
    bob.wait().await;

    for record in alice.received().snapshot() {
        println!("Alice received from {}: {}", record.sender, String::from_utf8_lossy(&record.payload));
    }
    for record in bob.received().snapshot() {
        println!("Bob received from {}: {}", record.sender, String::from_utf8_lossy(&record.payload));
    }

    alice.shutdown();
    bob.shutdown();
    Ok(())
}
