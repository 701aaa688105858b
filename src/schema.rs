use rusqlite_migration::{M, Migrations};
use std::sync::LazyLock;

pub static MIGRATIONS: LazyLock<Migrations<'static>> = LazyLock::new(|| {
    Migrations::new(vec![
        M::up(
            "
-- lab
CREATE TABLE lab_device (
    device      TEXT PRIMARY KEY,
    modality    TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT ''
);
INSERT INTO lab_device (device, modality, description)
    VALUES ('Miniscope_V4_BNO', 'Miniscope', 'V4 Miniscope with head orientation sensor.');

CREATE TABLE lab_anatomical_location (
    recording_location_id  TEXT PRIMARY KEY,
    anatomical_description TEXT NOT NULL
);

-- subject
CREATE TABLE subject (
    subject             TEXT PRIMARY KEY,
    sex                 TEXT NOT NULL CHECK (sex IN ('M', 'F', 'U')),
    subject_birth_date  TEXT NOT NULL,
    subject_description TEXT NOT NULL DEFAULT ''
);

-- session
CREATE TABLE session (
    subject          TEXT NOT NULL REFERENCES subject(subject) ON DELETE CASCADE,
    session_datetime TEXT NOT NULL,
    PRIMARY KEY (subject, session_datetime)
);

CREATE TABLE session_directory (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    session_dir      TEXT NOT NULL,
    PRIMARY KEY (subject, session_datetime),
    FOREIGN KEY (subject, session_datetime)
        REFERENCES session(subject, session_datetime) ON DELETE CASCADE
);

-- miniscope: lookups
CREATE TABLE acquisition_software (
    acq_software TEXT PRIMARY KEY
);
INSERT INTO acquisition_software (acq_software)
    VALUES ('Miniscope-DAQ-V3'), ('Miniscope-DAQ-V4');

CREATE TABLE processing_method (
    processing_method      TEXT PRIMARY KEY,
    processing_method_desc TEXT NOT NULL DEFAULT ''
);
INSERT INTO processing_method (processing_method, processing_method_desc) VALUES
    ('caiman', 'caiman analysis suite'),
    ('mcgill_miniscope_analysis', 'McGill Miniscope Analysis package');

CREATE TABLE activity_extraction_method (
    extraction_method TEXT PRIMARY KEY
);
INSERT INTO activity_extraction_method (extraction_method)
    VALUES ('caiman_deconvolution'), ('caiman_dff');

-- miniscope: acquisition
CREATE TABLE recording (
    subject             TEXT NOT NULL,
    session_datetime    TEXT NOT NULL,
    recording_id        INTEGER NOT NULL,
    device              TEXT NOT NULL REFERENCES lab_device(device),
    acq_software        TEXT NOT NULL REFERENCES acquisition_software(acq_software),
    recording_directory TEXT NOT NULL,
    recording_notes     TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (subject, session_datetime, recording_id),
    FOREIGN KEY (subject, session_datetime)
        REFERENCES session(subject, session_datetime) ON DELETE CASCADE
);

CREATE TABLE recording_location (
    subject               TEXT NOT NULL,
    session_datetime      TEXT NOT NULL,
    recording_id          INTEGER NOT NULL,
    recording_location_id TEXT NOT NULL
        REFERENCES lab_anatomical_location(recording_location_id),
    PRIMARY KEY (subject, session_datetime, recording_id),
    FOREIGN KEY (subject, session_datetime, recording_id)
        REFERENCES recording(subject, session_datetime, recording_id) ON DELETE CASCADE
);

CREATE TABLE recording_info (
    subject            TEXT NOT NULL,
    session_datetime   TEXT NOT NULL,
    recording_id       INTEGER NOT NULL,
    nchannels          INTEGER NOT NULL,
    nframes            INTEGER NOT NULL,
    px_height          INTEGER NOT NULL,
    px_width           INTEGER NOT NULL,
    fps                REAL NOT NULL,
    gain               REAL,
    spatial_downsample INTEGER NOT NULL DEFAULT 1,
    led_power          REAL,
    recording_datetime TEXT,
    recording_duration REAL NOT NULL,
    PRIMARY KEY (subject, session_datetime, recording_id),
    FOREIGN KEY (subject, session_datetime, recording_id)
        REFERENCES recording(subject, session_datetime, recording_id) ON DELETE CASCADE
);

CREATE TABLE recording_info_file (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    recording_id     INTEGER NOT NULL,
    file_id          INTEGER NOT NULL,
    file_path        TEXT NOT NULL,
    PRIMARY KEY (subject, session_datetime, recording_id, file_id),
    FOREIGN KEY (subject, session_datetime, recording_id)
        REFERENCES recording_info(subject, session_datetime, recording_id) ON DELETE CASCADE
);

-- miniscope: processing
CREATE TABLE processing_paramset (
    paramset_id       INTEGER PRIMARY KEY,
    processing_method TEXT NOT NULL REFERENCES processing_method(processing_method),
    paramset_desc     TEXT NOT NULL DEFAULT '',
    param_set_hash    TEXT NOT NULL UNIQUE,
    params            TEXT NOT NULL
);

CREATE TABLE processing_task (
    subject               TEXT NOT NULL,
    session_datetime      TEXT NOT NULL,
    recording_id          INTEGER NOT NULL,
    paramset_id           INTEGER NOT NULL REFERENCES processing_paramset(paramset_id),
    processing_output_dir TEXT NOT NULL,
    task_mode             TEXT NOT NULL DEFAULT 'load' CHECK (task_mode IN ('load', 'trigger')),
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id),
    FOREIGN KEY (subject, session_datetime, recording_id)
        REFERENCES recording(subject, session_datetime, recording_id) ON DELETE CASCADE
);

CREATE TABLE processing (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    recording_id     INTEGER NOT NULL,
    paramset_id      INTEGER NOT NULL,
    processing_time  TEXT NOT NULL,
    package_version  TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id),
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id)
        REFERENCES processing_task(subject, session_datetime, recording_id, paramset_id)
        ON DELETE CASCADE
);

CREATE TABLE curation (
    subject             TEXT NOT NULL,
    session_datetime    TEXT NOT NULL,
    recording_id        INTEGER NOT NULL,
    paramset_id         INTEGER NOT NULL,
    curation_id         INTEGER NOT NULL,
    curation_time       TEXT NOT NULL,
    curation_output_dir TEXT NOT NULL,
    manual_curation     INTEGER NOT NULL DEFAULT 0,
    curation_note       TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id, curation_id),
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id)
        REFERENCES processing(subject, session_datetime, recording_id, paramset_id)
        ON DELETE CASCADE
);

-- miniscope: results
CREATE TABLE motion_correction (
    subject                TEXT NOT NULL,
    session_datetime       TEXT NOT NULL,
    recording_id           INTEGER NOT NULL,
    paramset_id            INTEGER NOT NULL,
    curation_id            INTEGER NOT NULL,
    motion_correct_channel INTEGER NOT NULL,
    x_shifts               TEXT NOT NULL,
    y_shifts               TEXT NOT NULL,
    x_std                  REAL NOT NULL,
    y_std                  REAL NOT NULL,
    outlier_frames         TEXT,
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id, curation_id),
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id, curation_id)
        REFERENCES curation(subject, session_datetime, recording_id, paramset_id, curation_id)
        ON DELETE CASCADE
);

CREATE TABLE motion_correction_summary (
    subject           TEXT NOT NULL,
    session_datetime  TEXT NOT NULL,
    recording_id      INTEGER NOT NULL,
    paramset_id       INTEGER NOT NULL,
    curation_id       INTEGER NOT NULL,
    ref_image         TEXT,
    average_image     TEXT,
    correlation_image TEXT,
    max_proj_image    TEXT,
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id, curation_id),
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id, curation_id)
        REFERENCES motion_correction(subject, session_datetime, recording_id, paramset_id, curation_id)
        ON DELETE CASCADE
);

CREATE TABLE segmentation (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    recording_id     INTEGER NOT NULL,
    paramset_id      INTEGER NOT NULL,
    curation_id      INTEGER NOT NULL,
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id, curation_id),
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id, curation_id)
        REFERENCES curation(subject, session_datetime, recording_id, paramset_id, curation_id)
        ON DELETE CASCADE
);

CREATE TABLE segmentation_mask (
    subject              TEXT NOT NULL,
    session_datetime     TEXT NOT NULL,
    recording_id         INTEGER NOT NULL,
    paramset_id          INTEGER NOT NULL,
    curation_id          INTEGER NOT NULL,
    mask_id              INTEGER NOT NULL,
    segmentation_channel INTEGER NOT NULL,
    mask_npix            INTEGER NOT NULL,
    mask_center_x        INTEGER NOT NULL,
    mask_center_y        INTEGER NOT NULL,
    mask_xpix            TEXT NOT NULL,
    mask_ypix            TEXT NOT NULL,
    mask_weights         TEXT NOT NULL,
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id, curation_id, mask_id),
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id, curation_id)
        REFERENCES segmentation(subject, session_datetime, recording_id, paramset_id, curation_id)
        ON DELETE CASCADE
);

CREATE TABLE fluorescence (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    recording_id     INTEGER NOT NULL,
    paramset_id      INTEGER NOT NULL,
    curation_id      INTEGER NOT NULL,
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id, curation_id),
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id, curation_id)
        REFERENCES segmentation(subject, session_datetime, recording_id, paramset_id, curation_id)
        ON DELETE CASCADE
);

CREATE TABLE fluorescence_trace (
    subject               TEXT NOT NULL,
    session_datetime      TEXT NOT NULL,
    recording_id          INTEGER NOT NULL,
    paramset_id           INTEGER NOT NULL,
    curation_id           INTEGER NOT NULL,
    mask_id               INTEGER NOT NULL,
    fluorescence_channel  INTEGER NOT NULL,
    fluorescence          TEXT NOT NULL,
    neuropil_fluorescence TEXT,
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id, curation_id,
                 mask_id, fluorescence_channel),
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id, curation_id)
        REFERENCES fluorescence(subject, session_datetime, recording_id, paramset_id, curation_id)
        ON DELETE CASCADE,
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id, curation_id, mask_id)
        REFERENCES segmentation_mask(subject, session_datetime, recording_id, paramset_id,
                                     curation_id, mask_id)
        ON DELETE CASCADE
);

CREATE TABLE activity (
    subject           TEXT NOT NULL,
    session_datetime  TEXT NOT NULL,
    recording_id      INTEGER NOT NULL,
    paramset_id       INTEGER NOT NULL,
    curation_id       INTEGER NOT NULL,
    extraction_method TEXT NOT NULL
        REFERENCES activity_extraction_method(extraction_method),
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id, curation_id,
                 extraction_method),
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id, curation_id)
        REFERENCES fluorescence(subject, session_datetime, recording_id, paramset_id, curation_id)
        ON DELETE CASCADE
);

CREATE TABLE activity_trace (
    subject              TEXT NOT NULL,
    session_datetime     TEXT NOT NULL,
    recording_id         INTEGER NOT NULL,
    paramset_id          INTEGER NOT NULL,
    curation_id          INTEGER NOT NULL,
    extraction_method    TEXT NOT NULL,
    mask_id              INTEGER NOT NULL,
    fluorescence_channel INTEGER NOT NULL,
    activity_trace       TEXT NOT NULL,
    PRIMARY KEY (subject, session_datetime, recording_id, paramset_id, curation_id,
                 extraction_method, mask_id, fluorescence_channel),
    FOREIGN KEY (subject, session_datetime, recording_id, paramset_id, curation_id,
                 extraction_method)
        REFERENCES activity(subject, session_datetime, recording_id, paramset_id, curation_id,
                            extraction_method)
        ON DELETE CASCADE
);

CREATE INDEX idx_task_paramset ON processing_task(paramset_id);
",
        ),
        M::up(
            "
-- event
CREATE TABLE event_behavior_recording (
    subject              TEXT NOT NULL,
    session_datetime     TEXT NOT NULL,
    recording_start_time TEXT,
    recording_duration   REAL,
    recording_notes      TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (subject, session_datetime),
    FOREIGN KEY (subject, session_datetime)
        REFERENCES session(subject, session_datetime) ON DELETE CASCADE
);

CREATE TABLE event_behavior_recording_file (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    filepath         TEXT NOT NULL,
    PRIMARY KEY (subject, session_datetime, filepath),
    FOREIGN KEY (subject, session_datetime)
        REFERENCES event_behavior_recording(subject, session_datetime) ON DELETE CASCADE
);

CREATE TABLE event_type (
    event_type             TEXT PRIMARY KEY,
    event_type_description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE event (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    event_type       TEXT NOT NULL REFERENCES event_type(event_type),
    event_start_time REAL NOT NULL,
    event_end_time   REAL,
    PRIMARY KEY (subject, session_datetime, event_type, event_start_time),
    FOREIGN KEY (subject, session_datetime)
        REFERENCES event_behavior_recording(subject, session_datetime) ON DELETE CASCADE
);

CREATE TABLE event_alignment (
    alignment_name        TEXT PRIMARY KEY,
    alignment_description TEXT NOT NULL DEFAULT '',
    alignment_event_type  TEXT NOT NULL REFERENCES event_type(event_type),
    alignment_time_shift  REAL NOT NULL DEFAULT 0,
    start_event_type      TEXT NOT NULL REFERENCES event_type(event_type),
    start_time_shift      REAL NOT NULL DEFAULT 0,
    end_event_type        TEXT NOT NULL REFERENCES event_type(event_type),
    end_time_shift        REAL NOT NULL DEFAULT 0
);

-- trial
CREATE TABLE trial_block (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    block_id         INTEGER NOT NULL,
    block_start_time REAL NOT NULL,
    block_stop_time  REAL NOT NULL,
    PRIMARY KEY (subject, session_datetime, block_id),
    FOREIGN KEY (subject, session_datetime)
        REFERENCES session(subject, session_datetime) ON DELETE CASCADE
);

CREATE TABLE trial_block_attribute (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    block_id         INTEGER NOT NULL,
    attribute_name   TEXT NOT NULL,
    attribute_value  TEXT,
    PRIMARY KEY (subject, session_datetime, block_id, attribute_name),
    FOREIGN KEY (subject, session_datetime, block_id)
        REFERENCES trial_block(subject, session_datetime, block_id) ON DELETE CASCADE
);

CREATE TABLE trial_type (
    trial_type             TEXT PRIMARY KEY,
    trial_type_description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE trial (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    trial_id         INTEGER NOT NULL,
    trial_type       TEXT NOT NULL REFERENCES trial_type(trial_type),
    trial_start_time REAL NOT NULL,
    trial_stop_time  REAL NOT NULL,
    PRIMARY KEY (subject, session_datetime, trial_id),
    FOREIGN KEY (subject, session_datetime)
        REFERENCES session(subject, session_datetime) ON DELETE CASCADE
);

CREATE TABLE trial_attribute (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    trial_id         INTEGER NOT NULL,
    attribute_name   TEXT NOT NULL,
    attribute_value  TEXT,
    PRIMARY KEY (subject, session_datetime, trial_id, attribute_name),
    FOREIGN KEY (subject, session_datetime, trial_id)
        REFERENCES trial(subject, session_datetime, trial_id) ON DELETE CASCADE
);

CREATE TABLE trial_block_trial (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    block_id         INTEGER NOT NULL,
    trial_id         INTEGER NOT NULL,
    PRIMARY KEY (subject, session_datetime, block_id, trial_id),
    FOREIGN KEY (subject, session_datetime, block_id)
        REFERENCES trial_block(subject, session_datetime, block_id) ON DELETE CASCADE,
    FOREIGN KEY (subject, session_datetime, trial_id)
        REFERENCES trial(subject, session_datetime, trial_id) ON DELETE CASCADE
);

CREATE TABLE trial_event (
    subject          TEXT NOT NULL,
    session_datetime TEXT NOT NULL,
    trial_id         INTEGER NOT NULL,
    event_type       TEXT NOT NULL,
    event_start_time REAL NOT NULL,
    PRIMARY KEY (subject, session_datetime, trial_id, event_type, event_start_time),
    FOREIGN KEY (subject, session_datetime, trial_id)
        REFERENCES trial(subject, session_datetime, trial_id) ON DELETE CASCADE,
    FOREIGN KEY (subject, session_datetime, event_type, event_start_time)
        REFERENCES event(subject, session_datetime, event_type, event_start_time)
        ON DELETE CASCADE
);
",
        ),
        M::up(
            "
CREATE TABLE _jobs (
    table_name    TEXT NOT NULL,
    key_hash      TEXT NOT NULL,
    status        TEXT NOT NULL CHECK (status IN ('reserved', 'error')),
    key_text      TEXT NOT NULL,
    error_message TEXT,
    host          TEXT NOT NULL DEFAULT '',
    pid           INTEGER NOT NULL,
    reserved_at   TEXT NOT NULL,
    PRIMARY KEY (table_name, key_hash)
);
CREATE INDEX idx_jobs_status ON _jobs(status);
",
        ),
    ])
});
