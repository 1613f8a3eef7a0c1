//! Every peer sends a greeting to every other peer over the barrier-synchronized engine.

fn main() {
    let args = exstack::args::SessionArgs::from_args(std::env::args().skip(1))
        .unwrap_or_else(|e| panic!("argument error: {e}"));

    let transports = exstack::ThreadTransport::new_vector(args.peers);
    let handles: Vec<_> = transports
        .into_iter()
        .map(|t| {
            std::thread::spawn(move || {
                let mut session = exstack::ExStack::init(t, args.capacity, args.item_size)
                    .expect("peers agree on capacity and item_size");

                println!("peer {} of {} started", session.index(), session.peers());

                for dest in 0..session.peers() {
                    let greeting = format!("hello, {}", dest);
                    let mut item = vec![0u8; args.item_size];
                    let bytes = greeting.as_bytes();
                    item[..bytes.len().min(item.len())].copy_from_slice(&bytes[..bytes.len().min(item.len())]);
                    session.push(&item, dest);
                }
                session.exchange();

                let mut received = 0;
                let mut buf = vec![0u8; args.item_size];
                while received < session.peers() {
                    if let Some(src) = session.pop(&mut buf) {
                        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
                        println!("peer {}: received from {}: <{}>", session.index(), src, String::from_utf8_lossy(&buf[..end]));
                        received += 1;
                    } else if !session.proceed(true) {
                        break;
                    }
                }

                session.index()
            })
        })
        .collect();

    for handle in handles {
        match handle.join() {
            Ok(index) => println!("result: peer {index} finished"),
            Err(_) => println!("error in computation"),
        }
    }
}
