//! Binary artifact layout.
//!
//! The artifact is what the uploader ships to the device: a small header
//! followed by typed segments. The loader only requires `CODE` (relocated
//! bytecode, entry at byte 0) and `TASK` (the scheduler table) when tasks
//! exist; other segment tags are reserved.

/// File magic, first four bytes of every artifact.
pub const MAGIC: [u8; 4] = *b"RVM1";
/// Artifact format version.
pub const VERSION: u16 = 1;
/// Default per-task stack size in slots.
pub const DEFAULT_STACK_SIZE: u16 = 64;

/// Task trigger policy, as stored in the `TASK` segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskType {
    Cyclic = 0,
    Event = 1,
    Freewheeling = 2,
}

impl TaskType {
    pub fn from_byte(b: u8) -> Option<TaskType> {
        match b {
            0 => Some(TaskType::Cyclic),
            1 => Some(TaskType::Event),
            2 => Some(TaskType::Freewheeling),
            _ => None,
        }
    }
}

/// One row of the scheduler table.
///
/// Fixed 14-byte wire encoding:
/// `id:u16, type:u8, priority:u8, interval_us:u32, entry_point:u32, stack_size:u16`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: u16,
    pub task_type: TaskType,
    pub priority: u8,
    /// Scheduling interval in microseconds; 0 for event/freewheeling tasks.
    pub interval_us: u32,
    /// Absolute byte offset of the task's entry instruction in `CODE`.
    pub entry_point: u32,
    pub stack_size: u16,
}

impl TaskRecord {
    pub const ENCODED_SIZE: usize = 14;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_le_bytes());
        out.push(self.task_type as u8);
        out.push(self.priority);
        out.extend_from_slice(&self.interval_us.to_le_bytes());
        out.extend_from_slice(&self.entry_point.to_le_bytes());
        out.extend_from_slice(&self.stack_size.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Option<TaskRecord> {
        if bytes.len() < Self::ENCODED_SIZE {
            return None;
        }
        Some(TaskRecord {
            id: u16::from_le_bytes([bytes[0], bytes[1]]),
            task_type: TaskType::from_byte(bytes[2])?,
            priority: bytes[3],
            interval_us: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            entry_point: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            stack_size: u16::from_le_bytes([bytes[12], bytes[13]]),
        })
    }
}

/// A typed segment: 4-byte tag, u32 length, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub tag: [u8; 4],
    pub payload: Vec<u8>,
}

/// An artifact ready to be written to disk or streamed to the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    pub segments: Vec<Segment>,
}

impl Artifact {
    /// Build the standard two-segment artifact from relocated code and the
    /// task table.
    pub fn new(code: Vec<u8>, tasks: &[TaskRecord]) -> Artifact {
        let mut task_payload = Vec::with_capacity(tasks.len() * TaskRecord::ENCODED_SIZE);
        for task in tasks {
            task.encode(&mut task_payload);
        }
        Artifact {
            segments: vec![
                Segment {
                    tag: *b"CODE",
                    payload: code,
                },
                Segment {
                    tag: *b"TASK",
                    payload: task_payload,
                },
            ],
        }
    }

    pub fn segment(&self, tag: &[u8; 4]) -> Option<&Segment> {
        self.segments.iter().find(|s| &s.tag == tag)
    }

    /// Serialize: header (magic, version, segment count) then each segment.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        for seg in &self.segments {
            out.extend_from_slice(&seg.tag);
            out.extend_from_slice(&(seg.payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&seg.payload);
        }
        out
    }

    /// Parse an artifact back into segments. Used by the uploader and by
    /// round-trip tests; returns a message describing the first malformation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Artifact, String> {
        if bytes.len() < 8 {
            return Err("artifact truncated before header".to_string());
        }
        if bytes[0..4] != MAGIC {
            return Err(format!("bad magic {:02X?}", &bytes[0..4]));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(format!("unsupported artifact version {}", version));
        }
        let count = u16::from_le_bytes([bytes[6], bytes[7]]) as usize;
        let mut segments = Vec::with_capacity(count);
        let mut pos = 8;
        for _ in 0..count {
            if bytes.len() < pos + 8 {
                return Err("artifact truncated in segment header".to_string());
            }
            let tag = [bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]];
            let len =
                u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]])
                    as usize;
            pos += 8;
            if bytes.len() < pos + len {
                return Err(format!(
                    "segment {:?} claims {} bytes but only {} remain",
                    String::from_utf8_lossy(&tag),
                    len,
                    bytes.len() - pos
                ));
            }
            segments.push(Segment {
                tag,
                payload: bytes[pos..pos + len].to_vec(),
            });
            pos += len;
        }
        Ok(Artifact { segments })
    }

    /// Decode the `TASK` segment into records.
    pub fn tasks(&self) -> Result<Vec<TaskRecord>, String> {
        let seg = match self.segment(b"TASK") {
            Some(seg) => seg,
            None => return Ok(Vec::new()),
        };
        if seg.payload.len() % TaskRecord::ENCODED_SIZE != 0 {
            return Err(format!(
                "TASK segment length {} is not a multiple of {}",
                seg.payload.len(),
                TaskRecord::ENCODED_SIZE
            ));
        }
        seg.payload
            .chunks(TaskRecord::ENCODED_SIZE)
            .map(|chunk| TaskRecord::decode(chunk).ok_or_else(|| "bad task record".to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> TaskRecord {
        TaskRecord {
            id: 0,
            task_type: TaskType::Cyclic,
            priority: 1,
            interval_us: 10_000,
            entry_point: 0,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    #[test]
    fn test_artifact_round_trip() {
        let code = vec![0x02, 0x10, 0x00, 0x00, 0x00, 0x01];
        let artifact = Artifact::new(code.clone(), &[sample_task()]);
        let bytes = artifact.to_bytes();

        let parsed = Artifact::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.segment(b"CODE").unwrap().payload, code);
        assert_eq!(parsed.tasks().unwrap(), vec![sample_task()]);
    }

    #[test]
    fn test_task_record_is_14_bytes() {
        let mut out = Vec::new();
        sample_task().encode(&mut out);
        assert_eq!(out.len(), TaskRecord::ENCODED_SIZE);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = Artifact::new(vec![0x01], &[]).to_bytes();
        bytes[0] = b'X';
        assert!(Artifact::from_bytes(&bytes).unwrap_err().contains("magic"));
    }

    #[test]
    fn test_truncated_segment_rejected() {
        let bytes = Artifact::new(vec![0; 32], &[sample_task()]).to_bytes();
        let err = Artifact::from_bytes(&bytes[..20]).unwrap_err();
        assert!(err.contains("remain") || err.contains("truncated"));
    }
}
