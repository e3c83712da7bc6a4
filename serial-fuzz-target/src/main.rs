#[macro_use]
extern crate afl;
extern crate ant_host;
use ant_host::messages::process_buffer;

fn main() {
    fuzz!(|data: &[u8]| {
        let mut buf = data.to_vec();
        let _ = process_buffer(&mut buf);
        // Anything left over must be a shrinking tail, never regrown garbage
        assert!(buf.len() <= data.len());
    });
}
