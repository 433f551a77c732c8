use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::{Msg, Packet};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Registers an account, logs in and then prints whatever the server sends.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Websocket URL of the server
    #[clap(short, long, default_value = "ws://127.0.0.1:8080")]
    url: String,
    #[clap(short = 'n', long, default_value = "tester")]
    username: String,
    #[clap(short, long, default_value = "secret")]
    password: String,
    /// Seconds to keep listening after logging in
    #[clap(short, long, default_value = "5")]
    listen: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.url);
    let (socket, _) = connect_async(args.url.as_str()).await?;
    let (mut sender, mut receiver) = socket.split();

    // Print everything the server pushes to us
    let printer = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Binary(bytes)) => match shared::decode(&bytes) {
                    Ok(packet) => println!("<- from {}: {:?}", packet.sender_id, packet.msg),
                    Err(e) => println!("Failed to decode packet: {}", e),
                },
                Ok(Message::Close(_)) => {
                    println!("Server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    println!("Connection error: {}", e);
                    break;
                }
            }
        }
    });

    let requests = [
        Msg::register(args.username.as_str(), args.password.as_str()),
        Msg::login(args.username.as_str(), args.password.as_str()),
    ];

    for msg in requests {
        println!("-> {:?}", msg);
        let bytes = shared::encode(&Packet::new(0, msg))?;
        sender.send(Message::binary(bytes)).await?;
        sleep(Duration::from_millis(200)).await;
    }

    let _ = timeout(Duration::from_secs(args.listen), printer).await;
    sender.close().await?;

    Ok(())
}
