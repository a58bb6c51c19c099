//! Fuzz target: console `RingBuffer`
//!
//! Interprets the input as a script of push/pop/peek/discard operations
//! and checks the buffer against a `VecDeque` model after every step.
//!
//! cargo fuzz run fuzz_ring_buffer

#![no_main]

use std::collections::VecDeque;

use libfuzzer_sys::fuzz_target;
use periconsole::config::CONSOLE_FIFO_SIZE;
use periconsole::ring_buffer::RingBuffer;

fuzz_target!(|data: &[u8]| {
    let mut ring = RingBuffer::<CONSOLE_FIFO_SIZE>::new();
    let mut model: VecDeque<u8> = VecDeque::new();
    let mut scratch = [0u8; 256];

    let mut input = data;
    while let [op, arg, rest @ ..] = input {
        input = rest;
        let n = usize::from(*arg);
        match op % 4 {
            0 => {
                let chunk = &input[..n.min(input.len())];
                let accepted = ring.push_slice(chunk);
                assert_eq!(accepted, chunk.len().min(CONSOLE_FIFO_SIZE - model.len()));
                model.extend(&chunk[..accepted]);
                input = &input[chunk.len()..];
            }
            1 => {
                let got = ring.pop_into(&mut scratch[..n]);
                let want: Vec<u8> = model.drain(..got).collect();
                assert_eq!(&scratch[..got], want.as_slice());
            }
            2 => {
                let got = ring.peek_into(&mut scratch[..n]);
                assert!(model.iter().take(got).eq(scratch[..got].iter()));
            }
            _ => {
                let dropped = ring.discard(n);
                assert_eq!(dropped, n.min(model.len()));
                model.drain(..dropped);
            }
        }
        assert_eq!(ring.used(), model.len());
        assert!(ring.used() <= CONSOLE_FIFO_SIZE);
    }
});
