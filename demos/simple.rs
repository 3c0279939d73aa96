use attitude_fusion::{Driver, Madgwick, MadgwickSettings, QuaternionExt, Sample};
use nalgebra::{Quaternion, Vector3};

const SAMPLE_RATE: f32 = 100.0; // 100 Hz

fn main() {
    let mut driver = Driver::new(Madgwick::new(MadgwickSettings::default()));
    driver.init(SAMPLE_RATE).unwrap();

    let mut orientation = Quaternion::identity();

    for _ in 0..10 {
        // this loop should repeat each time new sensor data is available
        let gyroscope = Vector3::new(0.0, 0.0, 0.0); // replace this with actual gyroscope data in rad/s
        let accelerometer = Vector3::new(0.0, 0.0, 1.0); // replace this with actual accelerometer data in g

        let sample = Sample::imu(gyroscope, accelerometer);
        driver.feed(&sample, &mut orientation).unwrap();

        let euler = orientation.to_euler_degrees().unwrap();
        println!(
            "Roll: {:.2}, Pitch: {:.2}, Yaw: {:.2}",
            euler.x, euler.y, euler.z
        );
    }
}
