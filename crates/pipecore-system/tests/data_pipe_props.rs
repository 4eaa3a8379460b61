//! Property tests: a data pipe delivers exactly the bytes written, in order,
//! however writes and reads are chunked.

use pipecore_system::{
    Core, CoreError, CreateDataPipeOptions, ReadDataFlags, WriteDataFlags,
};
use proptest::prelude::*;

fn arb_chunks() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..32)
}

proptest! {
    #[test]
    fn bytes_arrive_in_write_order(
        chunks in arb_chunks(),
        capacity in 1usize..128,
        read_sizes in prop::collection::vec(1usize..48, 1..16),
    ) {
        let core = Core::with_default_config();
        let (producer, consumer) = core
            .create_data_pipe(&CreateDataPipeOptions {
                element_num_bytes: 1,
                capacity_num_bytes: Some(capacity),
            })
            .unwrap();

        let expected: Vec<u8> = chunks.concat();
        let mut received = Vec::with_capacity(expected.len());
        let mut reads = read_sizes.iter().cycle();

        for chunk in &chunks {
            let mut offset = 0;
            while offset < chunk.len() {
                match core.write_data(producer, &chunk[offset..], WriteDataFlags::empty()) {
                    Ok(written) => {
                        prop_assert!(written > 0);
                        offset += written;
                    }
                    Err(CoreError::ShouldWait(_)) => {
                        let max = *reads.next().unwrap();
                        let data = core
                            .read_data_up_to(consumer, max, ReadDataFlags::empty())
                            .unwrap();
                        prop_assert!(data.len() <= max);
                        received.extend_from_slice(&data);
                    }
                    Err(err) => return Err(TestCaseError::fail(err.to_string())),
                }
            }
        }

        core.close(producer).unwrap();
        loop {
            match core.read_data(consumer, ReadDataFlags::empty()) {
                Ok(data) => received.extend_from_slice(&data),
                Err(CoreError::PeerClosed) => break,
                Err(err) => return Err(TestCaseError::fail(err.to_string())),
            }
        }
        prop_assert_eq!(received, expected);
    }

    #[test]
    fn peek_matches_following_read(data in prop::collection::vec(any::<u8>(), 1..256)) {
        let core = Core::with_default_config();
        let (producer, consumer) = core
            .create_data_pipe(&CreateDataPipeOptions::default())
            .unwrap();
        core.write_data(producer, &data, WriteDataFlags::ALL_OR_NONE).unwrap();

        let peeked = core.read_data(consumer, ReadDataFlags::PEEK).unwrap();
        let read = core.read_data(consumer, ReadDataFlags::empty()).unwrap();
        prop_assert_eq!(&peeked[..], &data[..]);
        prop_assert_eq!(peeked, read);
    }
}
