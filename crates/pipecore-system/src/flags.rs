use bitflags::bitflags;

bitflags! {
    /// Flags for `write_message`. None are defined yet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteMessageFlags: u32 {
        const NONE = 0;
    }
}

bitflags! {
    /// Flags for `read_message`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ReadMessageFlags: u32 {
        /// Drop the message if its attached handles can't be installed,
        /// instead of leaving it at the head of the queue.
        const MAY_DISCARD = 1 << 0;
    }
}

bitflags! {
    /// Flags for `write_data`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteDataFlags: u32 {
        /// Write everything or nothing.
        const ALL_OR_NONE = 1 << 0;
    }
}

bitflags! {
    /// Flags for `read_data`, `read_data_up_to` and `discard_data`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ReadDataFlags: u32 {
        /// Move exactly the requested amount or nothing.
        const ALL_OR_NONE = 1 << 0;
        /// Copy the data out but leave it buffered.
        const PEEK = 1 << 1;
    }
}

/// Options for `create_message_pipe`. Message pipes have no knobs yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct CreateMessagePipeOptions {}
